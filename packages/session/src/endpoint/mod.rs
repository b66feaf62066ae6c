//! Endpoint selection
//!
//! Picks the strongest discovered endpoint that satisfies the caller's
//! request and points it at the address discovery was run against, since
//! servers often advertise internal host names.

pub mod policy;

use url::Url;

use crate::error::{Result, SessionError};
use crate::model::{EndpointDescription, EndpointDescriptor};

pub use policy::{SECURITY_POLICY_NAMESPACE, is_known_policy, policy_matches};

/// Choose the endpoint to connect to
///
/// `discovery_url` is where `discovered` came from; the chosen endpoint's
/// host and port are rewritten to it. With `reverse` set only candidates on
/// the requested scheme are acceptable.
pub fn select_endpoint(
    desired: &EndpointDescriptor,
    discovered: &[EndpointDescription],
    discovery_url: &str,
    reverse: bool,
) -> Result<EndpointDescription> {
    let requested = Url::parse(&desired.url)?;
    let no_match = || SessionError::NoMatchingEndpoint {
        requested: desired.url.clone(),
        discovered: discovered.to_vec(),
    };

    let mut candidates: Vec<&EndpointDescription> = discovered
        .iter()
        .filter(|endpoint| match rejection_reason(desired, endpoint) {
            Some(reason) => {
                tracing::info!(
                    endpoint = %endpoint.endpoint_url,
                    mode = %endpoint.security_mode,
                    policy = %endpoint.security_policy_uri,
                    reason,
                    "Endpoint rejected"
                );
                false
            }
            None => true,
        })
        .collect();

    // Stable, so equal ranks keep discovery order
    candidates.sort_by_key(|endpoint| std::cmp::Reverse(rank(endpoint)));

    let parsed: Vec<(&EndpointDescription, Option<Url>)> = candidates
        .into_iter()
        .map(|endpoint| (endpoint, Url::parse(&endpoint.endpoint_url).ok()))
        .collect();

    let same_scheme = |url: &Option<Url>| {
        url.as_ref()
            .is_some_and(|url| url.scheme() == requested.scheme())
    };
    let same_path = |url: &Option<Url>| {
        url.as_ref()
            .is_some_and(|url| trimmed_path(url) == trimmed_path(&requested))
    };

    let chosen = parsed
        .iter()
        .find(|(_, url)| same_scheme(url) && same_path(url))
        .or_else(|| parsed.iter().find(|(_, url)| same_scheme(url)))
        .or_else(|| {
            if reverse {
                None
            } else {
                parsed
                    .iter()
                    .find(|(_, url)| same_path(url))
                    .or_else(|| parsed.first())
            }
        })
        .map(|(endpoint, _)| *endpoint)
        .ok_or_else(no_match)?;

    let selected = rewrite_authority(chosen, discovery_url);
    tracing::info!(
        requested = %desired.url,
        endpoint = %selected.endpoint_url,
        advertised = %chosen.endpoint_url,
        mode = %selected.security_mode,
        policy = %selected.security_policy_uri,
        level = selected.security_level,
        reverse,
        "Endpoint selected"
    );
    Ok(selected)
}

/// Ranking key, higher is preferred
#[must_use]
pub fn rank(endpoint: &EndpointDescription) -> u32 {
    endpoint.security_mode.ordinal() * 256 + u32::from(endpoint.security_level)
}

fn rejection_reason(
    desired: &EndpointDescriptor,
    endpoint: &EndpointDescription,
) -> Option<&'static str> {
    if !is_known_policy(&endpoint.security_policy_uri) {
        return Some("unsupported security policy");
    }
    if desired
        .security_mode
        .is_some_and(|mode| mode != endpoint.security_mode)
    {
        return Some("security mode differs");
    }
    if desired
        .transport_profile_uri
        .as_deref()
        .is_some_and(|profile| profile != endpoint.transport_profile_uri)
    {
        return Some("transport profile differs");
    }
    if desired
        .security_policy
        .as_deref()
        .is_some_and(|policy| !policy_matches(policy, &endpoint.security_policy_uri))
    {
        return Some("security policy differs");
    }
    None
}

fn trimmed_path(url: &Url) -> &str {
    url.path().trim_end_matches('/')
}

fn rewrite_authority(endpoint: &EndpointDescription, discovery_url: &str) -> EndpointDescription {
    let mut selected = endpoint.clone();
    let (Ok(mut url), Ok(discovery)) =
        (Url::parse(&endpoint.endpoint_url), Url::parse(discovery_url))
    else {
        tracing::warn!(
            endpoint = %endpoint.endpoint_url,
            discovery_url,
            "Cannot rewrite endpoint address, keeping advertised url"
        );
        return selected;
    };

    if url.set_host(discovery.host_str()).is_err() {
        tracing::warn!(endpoint = %endpoint.endpoint_url, "Endpoint url does not accept a host");
        return selected;
    }
    if let Some(port) = discovery.port() {
        // Only fails for urls without a host, ruled out above
        let _ = url.set_port(Some(port));
    }
    selected.endpoint_url = url.into();
    selected
}
