mod client;
mod registry;
mod types;

pub use client::XuiClient;
pub use registry::PanelRegistry;
pub use types::{ClientTraffic, PanelClientView, ProvisionedClient};

/// Key email format shared by provisioning and panel sync:
/// `user{chat_id}-key{n}@{host_code}.bot`, with a `-trial` suffix on
/// the local part for trial keys.
pub fn key_email(chat_id: i64, key_number: i64, host_code: &str, trial: bool) -> String {
    let suffix = if trial { "-trial" } else { "" };
    format!("user{chat_id}-key{key_number}{suffix}@{host_code}.bot")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_email_format() {
        assert_eq!(key_email(123456, 4, "nl1", false), "user123456-key4@nl1.bot");
        assert_eq!(key_email(123456, 1, "nl1", true), "user123456-key1-trial@nl1.bot");
    }
}
