// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    command: Command,
}

impl Args {
    pub fn command(&self) -> &Command {
        &self.command
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the calculator, greet and blog services
    Serve(ServeArgs),

    /// Call one method on a running server
    Call(CallArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", env = "COURIER_CONFIG")]
    config: Option<String>,

    /// Address to listen on, overrides the configuration
    #[arg(short, long)]
    address: Option<String>,
}

impl ServeArgs {
    pub fn config(&self) -> Option<&str> {
        self.config.as_deref()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }
}

#[derive(clap::Args, Debug)]
pub struct CallArgs {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE", env = "COURIER_CONFIG")]
    config: Option<String>,

    /// Server address, overrides the configuration
    #[arg(short, long)]
    address: Option<String>,

    /// Call deadline, e.g. "5s" or "250ms"
    #[arg(short, long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    #[command(subcommand)]
    method: Method,
}

impl CallArgs {
    pub fn config(&self) -> Option<&str> {
        self.config.as_deref()
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    duration_str::parse(value).map_err(|e| e.to_string())
}

/// One subcommand per served method.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Method {
    Sum {
        #[arg(allow_negative_numbers = true)]
        a: i32,
        #[arg(allow_negative_numbers = true)]
        b: i32,
    },
    DecomposePrimeNumber {
        #[arg(allow_negative_numbers = true)]
        number: i64,
    },
    Average {
        #[arg(allow_negative_numbers = true)]
        numbers: Vec<i32>,
    },
    FindMaximum {
        #[arg(allow_negative_numbers = true)]
        numbers: Vec<i32>,
    },
    SquareRoot {
        #[arg(allow_negative_numbers = true)]
        number: f64,
    },
    Greet {
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
    },
    GreetManyTimes {
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
    },
    LongGreet {
        first_names: Vec<String>,
    },
    GreetEveryone {
        first_names: Vec<String>,
    },
    GreetWithDeadline {
        first_name: String,
        #[arg(long, default_value = "")]
        last_name: String,
    },
    CreateBlog {
        #[arg(long)]
        author_id: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        content: String,
    },
    ReadBlog {
        id: String,
    },
    UpdateBlog {
        id: String,
        #[arg(long)]
        author_id: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        content: String,
    },
    DeleteBlog {
        id: String,
    },
    ListBlog {
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// 0 lists everything
        #[arg(long, default_value_t = 0)]
        limit: u64,
    },
}
