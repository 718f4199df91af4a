//! shelterhub: auth, shelter and profile services over broker request/reply.
//!
//! Callers publish an [`Envelope`](shelterhub_client::Envelope) to a
//! service's durable queue with a correlation id and a reply address; the
//! service's [`Dispatcher`](dispatch::Dispatcher) runs the action and
//! publishes the [`Reply`](shelterhub_client::Reply) back, and the caller's
//! [`RpcClient`](rpc::RpcClient) matches it by correlation id.

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod dlq;
pub mod password;
pub mod rpc;
pub mod services;
pub mod shutdown;
pub mod storage;
pub mod utils;

#[cfg(all(feature = "channel", any(test, feature = "test-utils")))]
pub mod test_utils;
