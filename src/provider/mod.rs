mod factory;
mod http;
mod overrides;
mod resolver;

pub use factory::{Connector, ProviderFactory, ProviderHandle};
pub use http::{HttpConnector, HttpProvider};
pub use overrides::{validate_endpoint, Invalidate, ProviderOverrides, UserProviderOverride};
pub use resolver::{
    EndpointSource, KeySource, ProviderResolver, ProviderStatus, ResolvedProviderConfig,
};
