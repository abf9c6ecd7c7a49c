//! Endpoint resolution: turning one inbound request into N target URLs.

use url::Url;

use crate::error::Error;
use crate::request::InboundRequest;

/// Resolves the set of endpoints an inbound request is fanned out to.
pub trait Endpoints: Send + Sync {
    fn new_endpoints(&self, original: &InboundRequest) -> Result<Vec<Url>, Error>;
}

/// Adapter letting any closure act as an [`Endpoints`] resolver.
pub struct EndpointsFunc<F>(F);

impl<F> EndpointsFunc<F>
where
    F: Fn(&InboundRequest) -> Result<Vec<Url>, Error> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Endpoints for EndpointsFunc<F>
where
    F: Fn(&InboundRequest) -> Result<Vec<Url>, Error> + Send + Sync,
{
    fn new_endpoints(&self, original: &InboundRequest) -> Result<Vec<Url>, Error> {
        (self.0)(original)
    }
}

/// Resolve endpoints, panicking if the resolver fails.
///
/// Only for startup wiring, where a resolver error is a configuration bug.
pub fn must_new_endpoints(endpoints: &dyn Endpoints, original: &InboundRequest) -> Vec<Url> {
    match endpoints.new_endpoints(original) {
        Ok(urls) => urls,
        Err(e) => panic!("endpoint resolution failed: {e}"),
    }
}

/// A fixed list of base URLs. Each resolution overlays the inbound request's
/// path, query and fragment onto every base, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixedEndpoints(Vec<Url>);

impl FixedEndpoints {
    /// Parse every URL eagerly. Any malformed URL fails the whole set.
    pub fn new<I, S>(urls: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        urls.into_iter()
            .map(|raw| {
                let raw = raw.as_ref();
                Url::parse(raw).map_err(|source| Error::InvalidEndpoint {
                    url: raw.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn urls(&self) -> &[Url] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Build a [`FixedEndpoints`], panicking on a malformed URL.
///
/// Intended for URL literals and startup wiring.
pub fn must_new_fixed_endpoints<I, S>(urls: I) -> FixedEndpoints
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    match FixedEndpoints::new(urls) {
        Ok(fe) => fe,
        Err(e) => panic!("{e}"),
    }
}

impl Endpoints for FixedEndpoints {
    fn new_endpoints(&self, original: &InboundRequest) -> Result<Vec<Url>, Error> {
        Ok(self
            .0
            .iter()
            .map(|base| {
                let mut endpoint = base.clone();
                endpoint.set_path(original.url.path());
                endpoint.set_query(original.url.query());
                endpoint.set_fragment(original.url.fragment());
                endpoint
            })
            .collect())
    }
}
