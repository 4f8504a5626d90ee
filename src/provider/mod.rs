pub mod backends;
pub mod gateway;
pub mod rate_limit;
#[cfg(test)]
pub mod testing;

pub use gateway::{
    CompletionRequest, ImageAttachment, ModelGateway, ProviderKind, build_gateway,
    resolve_provider,
};
pub use rate_limit::{RatePolicy, policy_for};
