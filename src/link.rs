//! The `mw://` connection-link scheme.
//!
//! A link bundles everything needed to reach one tunnel server:
//! `mw://PASSWORD@HOST:PORT#NAME`. The password sits in the userinfo slot and is percent-encoded;
//! the display name rides in the fragment, also percent-encoded. Parse failures are returned as
//! values so the control surface can hand them to the caller verbatim.

use crate::error::Error;
use percent_encoding::{NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use url::Url;

const SCHEME: &str = "mw";

/// One imported server profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// The display name from the link fragment, possibly empty.
    pub name: String,
    /// The `host:port` of the tunnel server.
    pub server: String,
    /// The shared password.
    pub password: String,
}

/// Parses an `mw://` connection link into a [`Profile`].
///
/// # Errors
///
/// Will return [`Error::ParseLink`] for any malformed link: wrong scheme, missing host, missing
/// port, missing password or broken percent-encoding.
pub fn parse_link(link: &str) -> Result<Profile, Error> {
    let url = Url::parse(link).map_err(|err| Error::ParseLink(err.to_string()))?;

    if url.scheme() != SCHEME {
        return Err(Error::ParseLink(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| Error::ParseLink("missing host".to_string()))?;
    let port = url
        .port()
        .ok_or_else(|| Error::ParseLink("missing port".to_string()))?;

    let password = decode(url.username())?;
    if password.is_empty() {
        return Err(Error::ParseLink("missing password".to_string()));
    }

    let name = match url.fragment() {
        Some(fragment) => decode(fragment)?,
        None => String::new(),
    };

    Ok(Profile {
        name,
        server: format!("{host}:{port}"),
        password,
    })
}

/// Builds the `mw://` link for a [`Profile`], the inverse of [`parse_link`].
pub fn build_link(profile: &Profile) -> String {
    format!(
        "mw://{}@{}#{}",
        utf8_percent_encode(&profile.password, NON_ALPHANUMERIC),
        profile.server,
        utf8_percent_encode(&profile.name, NON_ALPHANUMERIC),
    )
}

fn decode(value: &str) -> Result<String, Error> {
    Ok(percent_decode_str(value)
        .decode_utf8()
        .map_err(|err| Error::ParseLink(err.to_string()))?
        .into_owned())
}
