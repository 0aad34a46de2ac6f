// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! `greet.GreetService`: greetings in all four call shapes, plus a slow
//! unary method that honours the caller's deadline.

use std::sync::Arc;
use std::time::Duration;

use duration_str::deserialize_duration;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use courier_rpc::{
    CallContext, CallOptions, Client, MethodDescriptor, RequestStream, ResponseSink, RpcError,
    ServiceRegistry, Shape, Status, bincode_codec,
};

pub const SERVICE: &str = "greet.GreetService";

pub const GREET: MethodDescriptor = MethodDescriptor::new(SERVICE, "Greet", Shape::Unary);
pub const GREET_MANY_TIMES: MethodDescriptor =
    MethodDescriptor::new(SERVICE, "GreetManyTimes", Shape::ServerStream);
pub const LONG_GREET: MethodDescriptor =
    MethodDescriptor::new(SERVICE, "LongGreet", Shape::ClientStream);
pub const GREET_EVERYONE: MethodDescriptor =
    MethodDescriptor::new(SERVICE, "GreetEveryone", Shape::BidiStream);
pub const GREET_WITH_DEADLINE: MethodDescriptor =
    MethodDescriptor::new(SERVICE, "GreetWithDeadline", Shape::Unary);

/// Responses sent by `GreetManyTimes`.
pub const GREET_MANY_TIMES_COUNT: usize = 10;

/// Steps waited by `GreetWithDeadline` before answering.
pub const DEADLINE_STEPS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Default, bincode::Encode, bincode::Decode)]
pub struct Greeting {
    pub first_name: String,
    pub last_name: String,
}

impl Greeting {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct GreetRequest {
    pub greeting: Greeting,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct GreetResponse {
    pub result: String,
}

bincode_codec!(GreetRequest, GreetResponse);

fn response(result: String) -> GreetResponse {
    GreetResponse { result }
}

/// Pacing of the streaming greet methods.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GreetConfig {
    /// Delay before each `GreetManyTimes` response.
    #[serde(
        default = "default_many_times_interval",
        deserialize_with = "deserialize_duration"
    )]
    many_times_interval: Duration,

    /// Delay after each `GreetEveryone` response.
    #[serde(
        default = "default_everyone_interval",
        deserialize_with = "deserialize_duration"
    )]
    everyone_interval: Duration,

    /// Length of one `GreetWithDeadline` step.
    #[serde(
        default = "default_deadline_step",
        deserialize_with = "deserialize_duration"
    )]
    deadline_step: Duration,
}

fn default_many_times_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_everyone_interval() -> Duration {
    Duration::from_millis(800)
}

fn default_deadline_step() -> Duration {
    Duration::from_secs(1)
}

impl Default for GreetConfig {
    fn default() -> Self {
        Self {
            many_times_interval: default_many_times_interval(),
            everyone_interval: default_everyone_interval(),
            deadline_step: default_deadline_step(),
        }
    }
}

impl GreetConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// No pacing at all.
    pub fn immediate() -> Self {
        Self {
            many_times_interval: Duration::ZERO,
            everyone_interval: Duration::ZERO,
            deadline_step: Duration::ZERO,
        }
    }

    pub fn with_many_times_interval(self, many_times_interval: Duration) -> Self {
        Self {
            many_times_interval,
            ..self
        }
    }

    pub fn with_everyone_interval(self, everyone_interval: Duration) -> Self {
        Self {
            everyone_interval,
            ..self
        }
    }

    pub fn with_deadline_step(self, deadline_step: Duration) -> Self {
        Self {
            deadline_step,
            ..self
        }
    }

    pub fn many_times_interval(&self) -> Duration {
        self.many_times_interval
    }

    pub fn everyone_interval(&self) -> Duration {
        self.everyone_interval
    }

    pub fn deadline_step(&self) -> Duration {
        self.deadline_step
    }
}

#[derive(Debug, Default)]
pub struct GreetService {
    config: GreetConfig,
}

impl GreetService {
    pub fn new(config: GreetConfig) -> Self {
        Self { config }
    }

    pub async fn greet(&self, request: GreetRequest) -> Result<GreetResponse, Status> {
        info!(greeting = ?request.greeting, "Greet invoked");
        Ok(response(format!("Hello, {}", request.greeting.first_name)))
    }

    pub async fn greet_many_times(
        &self,
        request: GreetRequest,
        sink: ResponseSink<GreetResponse>,
    ) -> Result<(), Status> {
        info!(greeting = ?request.greeting, "GreetManyTimes invoked");
        for i in 0..GREET_MANY_TIMES_COUNT {
            tokio::time::sleep(self.config.many_times_interval).await;
            sink.send(response(format!(
                "Hello, {} number {i}",
                request.greeting.first_name
            )))
            .await?;
        }
        Ok(())
    }

    pub async fn long_greet(
        &self,
        mut requests: RequestStream<GreetRequest>,
    ) -> Result<GreetResponse, Status> {
        info!("LongGreet invoked with a streaming request");
        let mut result = String::from("Hello ");
        while let Some(request) = requests.receive().await? {
            result.push_str(&request.greeting.first_name);
            result.push_str("! ");
        }
        Ok(response(result))
    }

    pub async fn greet_everyone(
        &self,
        mut requests: RequestStream<GreetRequest>,
        sink: ResponseSink<GreetResponse>,
    ) -> Result<(), Status> {
        info!("GreetEveryone invoked with a streaming request");
        while let Some(request) = requests.receive().await? {
            let first_name = request.greeting.first_name;
            sink.send(response(format!("Hello, {first_name}!"))).await?;
            tokio::time::sleep(self.config.everyone_interval).await;
            info!(%first_name, "greeting sent");
        }
        info!("client closed the stream");
        Ok(())
    }

    /// Answers after [`DEADLINE_STEPS`] steps. A call that ends earlier
    /// (deadline, cancel) drops this future between steps and the caller
    /// gets the status that ended it.
    pub async fn greet_with_deadline(
        &self,
        request: GreetRequest,
        ctx: CallContext,
    ) -> Result<GreetResponse, Status> {
        info!(greeting = ?request.greeting, remaining = ?ctx.remaining_time(), "GreetWithDeadline invoked");
        for step in 1..=DEADLINE_STEPS {
            tokio::time::sleep(self.config.deadline_step).await;
            debug!(step, remaining = ?ctx.remaining_time(), "GreetWithDeadline step done");
        }
        Ok(response(format!("Hello, {}", request.greeting.first_name)))
    }

    pub fn register(self: Arc<Self>, registry: &mut ServiceRegistry) -> Result<(), RpcError> {
        let service = self.clone();
        registry.register_unary(&GREET, move |request: GreetRequest, _ctx: CallContext| {
            let service = service.clone();
            async move { service.greet(request).await }
        })?;

        let service = self.clone();
        registry.register_server_stream(
            &GREET_MANY_TIMES,
            move |request: GreetRequest, sink: ResponseSink<GreetResponse>, _ctx: CallContext| {
                let service = service.clone();
                async move { service.greet_many_times(request, sink).await }
            },
        )?;

        let service = self.clone();
        registry.register_client_stream(
            &LONG_GREET,
            move |requests: RequestStream<GreetRequest>, _ctx: CallContext| {
                let service = service.clone();
                async move { service.long_greet(requests).await }
            },
        )?;

        let service = self.clone();
        registry.register_bidi_stream(
            &GREET_EVERYONE,
            move |requests: RequestStream<GreetRequest>,
                  sink: ResponseSink<GreetResponse>,
                  _ctx: CallContext| {
                let service = service.clone();
                async move { service.greet_everyone(requests, sink).await }
            },
        )?;

        let service = self;
        registry.register_unary(
            &GREET_WITH_DEADLINE,
            move |request: GreetRequest, ctx: CallContext| {
                let service = service.clone();
                async move { service.greet_with_deadline(request, ctx).await }
            },
        )?;

        Ok(())
    }
}

/// Typed client for the greet service.
#[derive(Debug, Clone)]
pub struct GreetClient {
    client: Client,
}

impl GreetClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn greet(&self, greeting: Greeting, options: CallOptions) -> Result<String, Status> {
        self.unary(&GREET, greeting, options).await
    }

    pub async fn greet_many_times(
        &self,
        greeting: Greeting,
        options: CallOptions,
        mut on_result: impl FnMut(String),
    ) -> Result<(), Status> {
        let mut call = self
            .client
            .open_server_stream::<GreetRequest, GreetResponse>(&GREET_MANY_TIMES, options)
            .await?;
        call.send_one(GreetRequest { greeting }).await?;
        while let Some(response) = call.receive().await? {
            on_result(response.result);
        }
        Ok(())
    }

    pub async fn long_greet(
        &self,
        greetings: impl IntoIterator<Item = Greeting>,
        options: CallOptions,
    ) -> Result<String, Status> {
        let call = self
            .client
            .open_client_stream::<GreetRequest, GreetResponse>(&LONG_GREET, options)
            .await?;
        for greeting in greetings {
            call.send(GreetRequest { greeting }).await?;
        }
        Ok(call.close_and_receive().await?.result)
    }

    pub async fn greet_everyone(
        &self,
        greetings: impl Stream<Item = Greeting>,
        options: CallOptions,
        mut on_result: impl FnMut(String),
    ) -> Result<(), Status> {
        use futures::StreamExt;

        let call = self
            .client
            .open_bidi_stream::<GreetRequest, GreetResponse>(&GREET_EVERYONE, options)
            .await?;
        call.drive(
            greetings.map(|greeting| GreetRequest { greeting }),
            |response| on_result(response.result),
        )
        .await
    }

    pub async fn greet_with_deadline(
        &self,
        greeting: Greeting,
        options: CallOptions,
    ) -> Result<String, Status> {
        self.unary(&GREET_WITH_DEADLINE, greeting, options).await
    }

    async fn unary(
        &self,
        method: &MethodDescriptor,
        greeting: Greeting,
        options: CallOptions,
    ) -> Result<String, Status> {
        let response: GreetResponse = self
            .client
            .unary(method, GreetRequest { greeting }, options)
            .await?;
        Ok(response.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = GreetConfig::default();
        assert_eq!(config.many_times_interval(), Duration::from_secs(1));
        assert_eq!(config.everyone_interval(), Duration::from_millis(800));
        assert_eq!(config.deadline_step(), Duration::from_secs(1));
    }

    #[test]
    fn test_config_from_yaml() {
        let config: GreetConfig =
            serde_yaml::from_str("many_times_interval: 250ms\ndeadline_step: 2s\n").unwrap();
        assert_eq!(config.many_times_interval(), Duration::from_millis(250));
        assert_eq!(config.everyone_interval(), Duration::from_millis(800));
        assert_eq!(config.deadline_step(), Duration::from_secs(2));

        let unknown: Result<GreetConfig, _> = serde_yaml::from_str("pace: 1s\n");
        assert!(unknown.is_err());
    }

    #[test]
    fn test_config_builders() {
        let config = GreetConfig::immediate().with_everyone_interval(Duration::from_millis(5));
        assert_eq!(config.many_times_interval(), Duration::ZERO);
        assert_eq!(config.everyone_interval(), Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_greet_text() {
        let service = GreetService::default();
        let response = service
            .greet(GreetRequest {
                greeting: Greeting::new("Ada", "Lovelace"),
            })
            .await
            .unwrap();
        assert_eq!(response.result, "Hello, Ada");
    }
}
