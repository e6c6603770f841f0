/*
 * SPDX-FileCopyrightText: 2022 Empo Inc.
 *
 * SPDX-License-Identifier: GPL-3.0-or-later
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
 * General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

use std::net::IpAddr;
use std::process;
use std::str::FromStr;

use clap::Parser;
use log::{error, info};
use rocket::config::LogLevel;
use rocket::fairing::AdHoc;

use crate::config::ConfigError;

#[macro_use]
extern crate rocket;
#[macro_use]
extern crate lazy_static;

mod api;
mod config;
mod error;
mod events;
mod metrics;
mod network;
mod peer;

const DEFAULT_CONFIG_PATH: &str = "/etc/wirerestd/config.toml";

lazy_static! {
    static ref ARGS: Args = Args::parse();
}

#[derive(clap::Parser)]
#[clap(about, version, author)]
struct Args {
    #[clap(long, short = 'c', value_name = "CONFIG")]
    config: Option<String>,

    #[clap(long, short = 'p', value_name = "port")]
    port: Option<u16>,
}

fn rocket_config(cfg: &config::Config) -> Result<rocket::Config, ConfigError> {
    let mut rcfg = rocket::Config::default();
    rcfg.address = IpAddr::from_str(cfg.api.listen()).map_err(|e| ConfigError::Invalid {
        msg: format!("api.listen: {}", e),
    })?;
    rcfg.port = ARGS.port.unwrap_or_else(|| cfg.api.port());
    if let Some(level) = &cfg.api.log_level {
        rcfg.log_level = LogLevel::from_str(level).map_err(|e| ConfigError::Invalid {
            msg: format!("api.log_level: {}", e),
        })?;
    }
    Ok(rcfg)
}

#[rocket::main]
async fn main() {
    let (cfgpath, required) = match &ARGS.config {
        Some(x) => (x.as_str(), true),
        None => (DEFAULT_CONFIG_PATH, false),
    };

    let (cfg, rcfg) = match config::read_config(cfgpath, required)
        .and_then(|cfg| rocket_config(&cfg).map(|rcfg| (cfg, rcfg)))
    {
        Ok(x) => x,
        Err(e) => {
            // Rocket's logger is not up yet
            eprintln!("{}", e);
            process::exit(1);
        }
    };

    let apikey = cfg.api.apikey.clone();
    let result = rocket::custom(rcfg)
        .attach(AdHoc::try_on_ignite("Peer service", |rocket| async move {
            match peer::bootstrap(&cfg).await {
                Ok((service, metrics)) => {
                    info!("Peer service ready");
                    Ok(rocket.attach(api::stage(apikey, service, metrics)))
                }
                Err(e) => {
                    error!("Startup failed: {}", e);
                    Err(rocket)
                }
            }
        }))
        .launch()
        .await;

    if let Err(e) = result {
        error!("Launch failed: {}", e);
        process::exit(1);
    }
}
