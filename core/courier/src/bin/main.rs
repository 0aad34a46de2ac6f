// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use clap::Parser;
use tracing::{Instrument, debug, info_span};

use courier::args::{Args, Command};
use courier::config::ConfigLoader;
use courier::{runner, runtime};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_file = match args.command() {
        Command::Serve(serve) => serve.config(),
        Command::Call(call) => call.config(),
    };
    let mut config = ConfigLoader::load(config_file).context("failed to load configuration")?;

    let runtime_config = config.runtime().context("invalid runtime configuration")?;
    let runtime = runtime::build(runtime_config).context("failed to build runtime")?;

    runtime.runtime.block_on(async move {
        let tracing_conf = config
            .tracing()
            .context("invalid tracing configuration")?
            .clone();
        tracing_conf.setup_tracing_subscriber();
        debug!(?tracing_conf);

        let root_span = info_span!("application_lifecycle");
        match args.command() {
            Command::Serve(serve) => {
                runner::serve(config, serve.address())
                    .instrument(root_span)
                    .await
            }
            Command::Call(call) => runner::call(config, call).instrument(root_span).await,
        }
    })
}
