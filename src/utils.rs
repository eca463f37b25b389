use crate::peer::types::ServerConfig;
use rand::Rng;

/// Store-style record id
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 10]>())
}

/// Adds the `stun:`/`turn:` scheme to an ICE server URL if it is missing
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
        || config.url.starts_with("stuns:")
    {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(kind: &str, url: &str) -> ServerConfig {
        ServerConfig {
            id: "s".into(),
            r#type: kind.into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    #[test]
    fn scheme_added_by_type() {
        assert_eq!(add_ice_url_scheme(&server("turn", "relay.example:80")), "turn:relay.example:80");
        assert_eq!(add_ice_url_scheme(&server("stun", "stun.example:3478")), "stun:stun.example:3478");
        assert_eq!(add_ice_url_scheme(&server("turn", "stun:x:1")), "stun:x:1");
    }

    #[test]
    fn ids_are_unique_hex() {
        let a = random_id();
        assert_eq!(a.len(), 20);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, random_id());
    }
}
