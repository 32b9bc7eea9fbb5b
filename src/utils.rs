pub mod os;

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::errors::{CntrError, CntrResult};

pub const DEFAULT_TAG: &str = "latest";

/// `<prefix>-<random>`; random enough to keep concurrent runs apart.
pub fn generate_name(prefix: &str) -> String {
    format!("{}-{}", prefix, rand::random::<u32>())
}

/// Split `repo[:tag][@digest]` into repository and tag, defaulting the tag to
/// `latest`. The digest is not part of either.
///
/// Only a colon in the last path component separates a tag; one that belongs
/// to a registry host (`localhost:5000/app`) does not.
pub fn split_image_ref(reference: &str) -> (String, String) {
    let name = reference
        .split_once('@')
        .map_or(reference, |(name, _digest)| name);
    let last_component = name.rfind('/').map_or(0, |slash| slash + 1);

    match name[last_component..].rfind(':') {
        Some(colon) => {
            let colon = last_component + colon;
            let (repo, tag) = (&name[..colon], &name[colon + 1..]);
            if repo.is_empty() || tag.is_empty() {
                (name.to_string(), DEFAULT_TAG.to_string())
            } else {
                (repo.to_string(), tag.to_string())
            }
        }
        None => (name.to_string(), DEFAULT_TAG.to_string()),
    }
}

/// Parse an image reference that is about to be written: `repo[:tag]` only.
pub fn parse_target_ref(reference: &str) -> CntrResult<(String, String)> {
    let invalid = |message: &str| CntrError::InvalidImageRef {
        reference: reference.to_string(),
        message: message.to_string(),
    };

    if reference.trim().is_empty() {
        return Err(invalid("empty image reference"));
    }
    if reference.contains('@') {
        return Err(invalid("a digest cannot be used as a target, give repo[:tag]"));
    }
    if reference.ends_with(':') || reference.starts_with(':') {
        return Err(invalid("empty repository or tag"));
    }
    Ok(split_image_ref(reference))
}

#[derive(Debug)]
pub enum PollError<E> {
    Probe(E),
    Deadline(Duration),
}

impl<E: fmt::Display> fmt::Display for PollError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollError::Probe(e) => write!(f, "{}", e),
            PollError::Deadline(d) => write!(f, "gave up after {}s", d.as_secs()),
        }
    }
}

/// Call `probe` every `interval` until it yields a value, fails, or `deadline`
/// passes. The first probe runs immediately.
pub async fn poll_until<T, E, F, Fut>(
    interval: Duration,
    deadline: Duration,
    mut probe: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let wait = async {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match probe().await {
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(e) => return Err(e),
            }
        }
    };

    match tokio::time::timeout(deadline, wait).await {
        Ok(result) => result.map_err(PollError::Probe),
        Err(_) => Err(PollError::Deadline(deadline)),
    }
}
