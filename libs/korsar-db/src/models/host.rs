use serde::{Deserialize, Serialize};

/// Remote 3x-ui panel a shop sells keys on.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Host {
    pub host_name: String,
    /// Short code embedded into key emails, lowercase with no spaces.
    pub host_code: String,
    pub host_url: String,
    pub host_username: String,
    pub host_pass: String,
    pub host_inbound_id: i64,
}

/// Canonical form for host codes: lowercased, all whitespace removed.
pub fn normalize_host_code(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_code_is_lowercased_and_stripped() {
        assert_eq!(normalize_host_code("NL Amsterdam 1"), "nlamsterdam1");
        assert_eq!(normalize_host_code("de-fra"), "de-fra");
    }
}
