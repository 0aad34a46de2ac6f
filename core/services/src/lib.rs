// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use courier_rpc::{RpcError, ServiceRegistry};
use courier_store::DocumentStore;

pub mod blog;
pub mod calculator;
pub mod greet;

pub use blog::{Blog, BlogClient, BlogItem, BlogService};
pub use calculator::CalculatorClient;
pub use greet::{GreetClient, GreetConfig, GreetService, Greeting};

/// Registry serving the calculator, greet and blog services.
pub fn registry(
    greet: GreetConfig,
    blog_store: Arc<dyn DocumentStore<BlogItem>>,
) -> Result<ServiceRegistry, RpcError> {
    let mut registry = ServiceRegistry::new();
    calculator::register(&mut registry)?;
    Arc::new(GreetService::new(greet)).register(&mut registry)?;
    Arc::new(BlogService::new(blog_store)).register(&mut registry)?;
    Ok(registry)
}
