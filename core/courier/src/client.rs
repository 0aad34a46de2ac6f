// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::{debug, info};

use courier_rpc::{CallOptions, Client, SessionConfig, Status};
use courier_services::blog::ListBlogRequest;
use courier_services::{Blog, BlogClient, CalculatorClient, GreetClient, Greeting};

use crate::args::Method;
use crate::server::default_address;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClientConfiguration {
    #[serde(default = "default_address")]
    address: String,
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        ClientConfiguration {
            address: default_address(),
        }
    }
}

impl ClientConfiguration {
    pub fn with_address(self, address: impl Into<String>) -> Self {
        ClientConfiguration {
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

pub async fn connect(address: &str, session: SessionConfig) -> std::io::Result<Client> {
    let stream = TcpStream::connect(address).await?;
    stream.set_nodelay(true)?;
    info!(%address, "connected");
    Ok(Client::connect(stream, session))
}

/// Runs `method` and hands every line of output to `emit` as it arrives.
pub async fn call(
    client: &Client,
    method: &Method,
    options: CallOptions,
    mut emit: impl FnMut(String),
) -> Result<(), Status> {
    debug!(?method, "calling");
    match method.clone() {
        Method::Sum { a, b } => {
            let result = CalculatorClient::new(client.clone()).sum(a, b, options).await?;
            emit(result.to_string());
        }
        Method::DecomposePrimeNumber { number } => {
            CalculatorClient::new(client.clone())
                .decompose_prime_number(number, options, |factor| emit(factor.to_string()))
                .await?;
        }
        Method::Average { numbers } => {
            let average = CalculatorClient::new(client.clone())
                .average(numbers, options)
                .await?;
            emit(average.to_string());
        }
        Method::FindMaximum { numbers } => {
            CalculatorClient::new(client.clone())
                .find_maximum(stream::iter(numbers), options, |maximum| {
                    emit(maximum.to_string())
                })
                .await?;
        }
        Method::SquareRoot { number } => {
            let root = CalculatorClient::new(client.clone())
                .square_root(number, options)
                .await?;
            emit(root.to_string());
        }
        Method::Greet {
            first_name,
            last_name,
        } => {
            let result = GreetClient::new(client.clone())
                .greet(Greeting::new(first_name, last_name), options)
                .await?;
            emit(result);
        }
        Method::GreetManyTimes {
            first_name,
            last_name,
        } => {
            GreetClient::new(client.clone())
                .greet_many_times(Greeting::new(first_name, last_name), options, &mut emit)
                .await?;
        }
        Method::LongGreet { first_names } => {
            let greetings = first_names.into_iter().map(|name| Greeting::new(name, ""));
            let result = GreetClient::new(client.clone())
                .long_greet(greetings, options)
                .await?;
            emit(result);
        }
        Method::GreetEveryone { first_names } => {
            let greetings = first_names.into_iter().map(|name| Greeting::new(name, ""));
            GreetClient::new(client.clone())
                .greet_everyone(stream::iter(greetings), options, &mut emit)
                .await?;
        }
        Method::GreetWithDeadline {
            first_name,
            last_name,
        } => {
            let result = GreetClient::new(client.clone())
                .greet_with_deadline(Greeting::new(first_name, last_name), options)
                .await?;
            emit(result);
        }
        Method::CreateBlog {
            author_id,
            title,
            content,
        } => {
            let blog = Blog {
                id: String::new(),
                author_id,
                title,
                content,
            };
            let created = BlogClient::new(client.clone())
                .create_blog(blog, options)
                .await?;
            emit(render(&created));
        }
        Method::ReadBlog { id } => {
            let blog = BlogClient::new(client.clone()).read_blog(&id, options).await?;
            emit(render(&blog));
        }
        Method::UpdateBlog {
            id,
            author_id,
            title,
            content,
        } => {
            let blog = Blog {
                id,
                author_id,
                title,
                content,
            };
            let updated = BlogClient::new(client.clone())
                .update_blog(blog, options)
                .await?;
            emit(render(&updated));
        }
        Method::DeleteBlog { id } => {
            let deleted = BlogClient::new(client.clone())
                .delete_blog(&id, options)
                .await?;
            emit(format!("deleted {deleted}"));
        }
        Method::ListBlog { offset, limit } => {
            BlogClient::new(client.clone())
                .list_blog(ListBlogRequest { offset, limit }, options, |blog| {
                    emit(render(&blog))
                })
                .await?;
        }
    }
    Ok(())
}

fn render(blog: &Blog) -> String {
    format!(
        "{} author={} title={:?} content={:?}",
        blog.id, blog.author_id, blog.title, blog.content
    )
}
