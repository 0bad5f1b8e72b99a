//! Client configuration
//!
//! Two URLs are supplied from outside: the relay endpoint and the base for
//! avatar pictures. Both are validated up front; a bad value is a startup
//! error, never a partially working client.

use url::Url;

use crate::error::{ChatError, ChatResult};

/// Relay endpoint used when none is configured
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:7051/chat";

/// Avatar image host used when none is configured
pub const DEFAULT_AVATAR_BASE: &str = "https://avatars.jusemon.com";

/// Base URL that participant pictures are resolved against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarBase(Url);

impl AvatarBase {
    /// Parse and validate an avatar base URL
    pub fn parse(raw: &str) -> ChatResult<Self> {
        let url = Url::parse(raw)
            .map_err(|e| ChatError::Config(format!("invalid avatar base {:?}: {}", raw, e)))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChatError::Config(format!(
                "avatar base must be http(s), got {:?}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(ChatError::Config(format!("avatar base {:?} has no host", raw)));
        }

        Ok(AvatarBase(url))
    }

    /// Picture reference for a participant
    pub fn picture_for(&self, name: &str) -> String {
        format!(
            "{}/{}.png&size=20",
            self.0.as_str().trim_end_matches('/'),
            name.to_lowercase()
        )
    }

    /// The underlying URL
    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

/// Everything the client needs from its environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    relay_url: Url,
    avatars: AvatarBase,
}

impl ClientConfig {
    /// Validate both URLs
    ///
    /// `http`/`https` relay URLs are rewritten to `ws`/`wss`.
    pub fn new(relay_url: &str, avatar_base: &str) -> ChatResult<Self> {
        Ok(ClientConfig {
            relay_url: parse_relay_url(relay_url)?,
            avatars: AvatarBase::parse(avatar_base)?,
        })
    }

    /// The relay WebSocket endpoint
    pub fn relay_url(&self) -> &Url {
        &self.relay_url
    }

    /// The avatar base
    pub fn avatars(&self) -> &AvatarBase {
        &self.avatars
    }
}

fn parse_relay_url(raw: &str) -> ChatResult<Url> {
    let mut url = Url::parse(raw)
        .map_err(|e| ChatError::Config(format!("invalid relay url {:?}: {}", raw, e)))?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(ChatError::Config(format!(
                "relay url must be ws(s) or http(s), got {:?}",
                other
            )))
        }
    };

    if url.host_str().is_none() {
        return Err(ChatError::Config(format!("relay url {:?} has no host", raw)));
    }

    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|()| ChatError::Config(format!("cannot use {:?} as relay url", raw)))?;
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::new(DEFAULT_RELAY_URL, DEFAULT_AVATAR_BASE).unwrap();
        assert_eq!(config.relay_url().as_str(), "ws://localhost:7051/chat");
    }

    #[test]
    fn test_https_relay_becomes_wss() {
        let config = ClientConfig::new("https://chat.example.com/hub", DEFAULT_AVATAR_BASE).unwrap();
        assert_eq!(config.relay_url().scheme(), "wss");
        assert_eq!(config.relay_url().path(), "/hub");

        let config = ClientConfig::new("http://127.0.0.1:9000", DEFAULT_AVATAR_BASE).unwrap();
        assert_eq!(config.relay_url().scheme(), "ws");
    }

    #[test]
    fn test_malformed_urls_rejected() {
        assert!(matches!(
            ClientConfig::new("not a url", DEFAULT_AVATAR_BASE),
            Err(ChatError::Config(_))
        ));
        assert!(ClientConfig::new("ftp://relay.example.com", DEFAULT_AVATAR_BASE).is_err());
        assert!(ClientConfig::new(DEFAULT_RELAY_URL, "ws://avatars.example.com").is_err());
        assert!(ClientConfig::new(DEFAULT_RELAY_URL, "").is_err());
    }

    #[test]
    fn test_picture_for_lowercases_name() {
        let avatars = AvatarBase::parse("https://avatars.example.com").unwrap();
        assert_eq!(
            avatars.picture_for("Alice"),
            "https://avatars.example.com/alice.png&size=20"
        );

        let nested = AvatarBase::parse("https://cdn.example.com/avatars/").unwrap();
        assert_eq!(
            nested.picture_for("BOB"),
            "https://cdn.example.com/avatars/bob.png&size=20"
        );
    }
}
