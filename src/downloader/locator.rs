// ScriptLocator - finds the player script and client version in a watch page

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use super::config::Config;
use super::errors::LocatorError;
use super::models::{ClientVersion, PlayerScriptRef};

lazy_static! {
    /// The origin has used both key names for the script path
    static ref SCRIPT_PATH_RE: Regex =
        Regex::new(r#""(?:jsUrl|PLAYER_JS_URL)"\s*:\s*"([^"]+)""#).unwrap();
    static ref CLIENT_VERSION_RE: Regex =
        Regex::new(r#""INNERTUBE_CLIENT_VERSION"\s*:\s*"([^"]+)""#).unwrap();
}

pub struct ScriptLocator {
    origin: String,
    fallback_version: String,
}

impl ScriptLocator {
    pub fn new(config: &Config) -> Self {
        Self {
            origin: config.network.origin_root().to_string(),
            fallback_version: config.fallback_client_version.clone(),
        }
    }

    /// Extract the player script reference.
    ///
    /// A missing script path is fatal. A missing client version is replaced
    /// by the configured fallback, which is marked as such so it gets its
    /// own cache key.
    pub fn locate(&self, html: &str) -> Result<PlayerScriptRef, LocatorError> {
        let raw_path = SCRIPT_PATH_RE
            .captures(html)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().replace("\\/", "/"))
            .ok_or(LocatorError::ScriptPathMissing)?;

        let url = self.absolute_url(&raw_path)?;

        let client_version = match CLIENT_VERSION_RE.captures(html).and_then(|c| c.get(1)) {
            Some(m) => ClientVersion::Discovered(m.as_str().to_string()),
            None => {
                warn!(
                    fallback = %self.fallback_version,
                    "client version not found in page, using fallback"
                );
                ClientVersion::Fallback(self.fallback_version.clone())
            }
        };

        debug!(script = %url, version = %client_version, "located player script");
        Ok(PlayerScriptRef {
            url,
            client_version,
        })
    }

    /// Prefix the origin root to a relative script path
    fn absolute_url(&self, path: &str) -> Result<Url, LocatorError> {
        let base = Url::parse(&format!("{}/", self.origin))
            .map_err(|_| LocatorError::InvalidScriptUrl(self.origin.clone()))?;
        base.join(path)
            .map_err(|_| LocatorError::InvalidScriptUrl(path.to_string()))
    }
}
