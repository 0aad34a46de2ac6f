// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! `calculator.CalculatorService`: one arithmetic method per call shape.

use futures::Stream;
use tracing::info;

use courier_rpc::{
    CallContext, CallOptions, Client, MethodDescriptor, RequestStream, ResponseSink, RpcError,
    ServiceRegistry, Shape, Status, bincode_codec,
};

pub const SERVICE: &str = "calculator.CalculatorService";

pub const SUM: MethodDescriptor = MethodDescriptor::new(SERVICE, "Sum", Shape::Unary);
pub const DECOMPOSE_PRIME_NUMBER: MethodDescriptor =
    MethodDescriptor::new(SERVICE, "DecomposePrimeNumber", Shape::ServerStream);
pub const AVERAGE: MethodDescriptor =
    MethodDescriptor::new(SERVICE, "Average", Shape::ClientStream);
pub const FIND_MAXIMUM: MethodDescriptor =
    MethodDescriptor::new(SERVICE, "FindMaximum", Shape::BidiStream);
pub const SQUARE_ROOT: MethodDescriptor =
    MethodDescriptor::new(SERVICE, "SquareRoot", Shape::Unary);

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct SumRequest {
    pub a: i32,
    pub b: i32,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct SumResponse {
    pub result: i64,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct DecomposePrimeNumberRequest {
    pub number: i64,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct DecomposePrimeNumberResponse {
    pub factor: i64,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct AverageRequest {
    pub number: i32,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct AverageResponse {
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct FindMaximumRequest {
    pub number: i32,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct FindMaximumResponse {
    pub maximum: i32,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct SquareRootRequest {
    pub number: f64,
}

#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct SquareRootResponse {
    pub root: f64,
}

bincode_codec!(
    SumRequest,
    SumResponse,
    DecomposePrimeNumberRequest,
    DecomposePrimeNumberResponse,
    AverageRequest,
    AverageResponse,
    FindMaximumRequest,
    FindMaximumResponse,
    SquareRootRequest,
    SquareRootResponse,
);

/// Prime factors of `number` in ascending order, with multiplicity.
/// Empty for 0 and 1.
pub fn prime_factors(mut number: u64) -> impl Iterator<Item = u64> {
    let mut divisor = 2u64;
    std::iter::from_fn(move || {
        while number > 1 {
            if divisor.saturating_mul(divisor) > number {
                // what is left is prime
                let factor = number;
                number = 1;
                return Some(factor);
            }
            if number % divisor == 0 {
                number /= divisor;
                return Some(divisor);
            }
            divisor += 1;
        }
        None
    })
}

async fn sum(request: SumRequest, _ctx: CallContext) -> Result<SumResponse, Status> {
    info!(a = request.a, b = request.b, "Sum invoked");
    Ok(SumResponse {
        result: i64::from(request.a) + i64::from(request.b),
    })
}

async fn decompose_prime_number(
    request: DecomposePrimeNumberRequest,
    sink: ResponseSink<DecomposePrimeNumberResponse>,
    _ctx: CallContext,
) -> Result<(), Status> {
    info!(number = request.number, "DecomposePrimeNumber invoked");
    let number = u64::try_from(request.number).map_err(|_| {
        Status::invalid_argument(format!(
            "received a negative number: {}",
            request.number
        ))
    })?;

    for factor in prime_factors(number) {
        sink.send(DecomposePrimeNumberResponse {
            factor: factor as i64,
        })
        .await?;
    }
    Ok(())
}

async fn average(
    mut requests: RequestStream<AverageRequest>,
    _ctx: CallContext,
) -> Result<AverageResponse, Status> {
    let mut total = 0i64;
    let mut count = 0u64;
    while let Some(request) = requests.receive().await? {
        total += i64::from(request.number);
        count += 1;
    }

    info!(count, "Average computed");
    if count == 0 {
        return Err(Status::invalid_argument("cannot average an empty stream"));
    }
    Ok(AverageResponse {
        average: total as f64 / count as f64,
    })
}

async fn find_maximum(
    mut requests: RequestStream<FindMaximumRequest>,
    sink: ResponseSink<FindMaximumResponse>,
    _ctx: CallContext,
) -> Result<(), Status> {
    let mut maximum: Option<i32> = None;
    while let Some(request) = requests.receive().await? {
        if maximum.is_none_or(|current| request.number > current) {
            maximum = Some(request.number);
            sink.send(FindMaximumResponse {
                maximum: request.number,
            })
            .await?;
        }
    }
    Ok(())
}

async fn square_root(
    request: SquareRootRequest,
    _ctx: CallContext,
) -> Result<SquareRootResponse, Status> {
    info!(number = request.number, "SquareRoot invoked");
    if request.number < 0.0 {
        return Err(Status::invalid_argument(format!(
            "received a negative number: {}",
            request.number
        )));
    }
    Ok(SquareRootResponse {
        root: request.number.sqrt(),
    })
}

pub fn register(registry: &mut ServiceRegistry) -> Result<(), RpcError> {
    registry
        .register_unary(&SUM, sum)?
        .register_server_stream(&DECOMPOSE_PRIME_NUMBER, decompose_prime_number)?
        .register_client_stream(&AVERAGE, average)?
        .register_bidi_stream(&FIND_MAXIMUM, find_maximum)?
        .register_unary(&SQUARE_ROOT, square_root)?;
    Ok(())
}

/// Typed client for the calculator service.
#[derive(Debug, Clone)]
pub struct CalculatorClient {
    client: Client,
}

impl CalculatorClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn sum(&self, a: i32, b: i32, options: CallOptions) -> Result<i64, Status> {
        let response: SumResponse = self
            .client
            .unary(&SUM, SumRequest { a, b }, options)
            .await?;
        Ok(response.result)
    }

    /// Hands every factor to `on_factor` as it arrives.
    pub async fn decompose_prime_number(
        &self,
        number: i64,
        options: CallOptions,
        mut on_factor: impl FnMut(i64),
    ) -> Result<(), Status> {
        let mut call = self
            .client
            .open_server_stream::<DecomposePrimeNumberRequest, DecomposePrimeNumberResponse>(
                &DECOMPOSE_PRIME_NUMBER,
                options,
            )
            .await?;
        call.send_one(DecomposePrimeNumberRequest { number }).await?;
        while let Some(response) = call.receive().await? {
            on_factor(response.factor);
        }
        Ok(())
    }

    pub async fn average(
        &self,
        numbers: impl IntoIterator<Item = i32>,
        options: CallOptions,
    ) -> Result<f64, Status> {
        let call = self
            .client
            .open_client_stream::<AverageRequest, AverageResponse>(&AVERAGE, options)
            .await?;
        for number in numbers {
            call.send(AverageRequest { number }).await?;
        }
        Ok(call.close_and_receive().await?.average)
    }

    /// Streams `numbers` while reporting every new maximum to
    /// `on_maximum`.
    pub async fn find_maximum(
        &self,
        numbers: impl Stream<Item = i32>,
        options: CallOptions,
        mut on_maximum: impl FnMut(i32),
    ) -> Result<(), Status> {
        use futures::StreamExt;

        let call = self
            .client
            .open_bidi_stream::<FindMaximumRequest, FindMaximumResponse>(&FIND_MAXIMUM, options)
            .await?;
        call.drive(
            numbers.map(|number| FindMaximumRequest { number }),
            |response| on_maximum(response.maximum),
        )
        .await
    }

    pub async fn square_root(&self, number: f64, options: CallOptions) -> Result<f64, Status> {
        let response: SquareRootResponse = self
            .client
            .unary(&SQUARE_ROOT, SquareRootRequest { number }, options)
            .await?;
        Ok(response.root)
    }
}
