//! Slack message templates

pub fn monitor_down(monitor_name: &str, url: &str) -> String {
    format!(":rotating_light: {monitor_name} is DOWN\nURL: {url}")
}

pub fn monitor_up(monitor_name: &str, url: &str) -> String {
    format!(":white_check_mark: {monitor_name} is back UP\nURL: {url}")
}

pub fn incident_created(incident_title: &str) -> String {
    format!(":memo: Incident created: {incident_title}")
}

pub fn incident_resolved(incident_title: &str) -> String {
    format!(":white_check_mark: Incident resolved: {incident_title}")
}

/// Default body of a user-triggered test notification
pub const TEST_MESSAGE: &str = "Test notification from Hawk";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates() {
        assert_eq!(
            monitor_down("API", "https://api.example.com"),
            ":rotating_light: API is DOWN\nURL: https://api.example.com"
        );
        assert_eq!(
            monitor_up("API", "https://api.example.com"),
            ":white_check_mark: API is back UP\nURL: https://api.example.com"
        );
        assert_eq!(incident_created("API is down"), ":memo: Incident created: API is down");
        assert_eq!(incident_resolved("API is down"), ":white_check_mark: Incident resolved: API is down");
    }
}
