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

use std::fs::File;
use std::io::{self, Write};

use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::Argon2;
use clap::Parser;
use custom_error::custom_error;
use serde::Serialize;

#[macro_use]
extern crate lazy_static;

lazy_static! {
    static ref ARGS: Args = Args::parse();
}

#[derive(clap::Parser)]
#[clap(about, version, author)]
struct Args {
    #[clap(long, short = 'c', value_name = "CONFIG")]
    config: String,

    #[clap(long, short = 't', value_name = "password")]
    token: Option<String>,

    #[clap(long, short = 'p', value_name = "port")]
    port: Option<u16>,

    #[clap(long, short = 'i', value_name = "interface")]
    interface: Option<String>,

    #[clap(long, value_name = "CIDR")]
    pool: Option<String>,
}

custom_error! {ConfigGenError
    Hash{msg: String} = "Failed to hash token: {msg}",
    Encode{source: toml::ser::Error} = "Failed to serialize config: {source}",
    Io{source: io::Error} = "Failed to write config file: {source}",
}

#[derive(Serialize)]
struct Config {
    pub api: Api,
    pub wireguard: Wireguard,
    pub network: Network,
}

#[derive(Serialize)]
struct Api {
    pub listen: String,
    pub port: Option<u16>,
    pub apikey: String,
}

#[derive(Serialize)]
struct Wireguard {
    pub interface: String,
    pub backend: String,
}

#[derive(Serialize)]
struct Network {
    pub ipv4_pool: Vec<String>,
}

fn main() -> Result<(), ConfigGenError> {
    // Generate salt
    let salt = SaltString::generate(&mut OsRng);
    let token = ARGS.token.as_deref().unwrap_or("crowbar");

    let argon2 = Argon2::default();
    let token_hash = argon2
        .hash_password(token.as_bytes(), &salt)
        .map_err(|e| ConfigGenError::Hash { msg: e.to_string() })?
        .to_string();

    let cfg = Config {
        api: Api {
            listen: "127.0.0.1".to_string(),
            port: ARGS.port,
            apikey: token_hash,
        },
        wireguard: Wireguard {
            interface: ARGS.interface.clone().unwrap_or_else(|| "wg0".to_string()),
            backend: "cli".to_string(),
        },
        network: Network {
            ipv4_pool: vec![ARGS
                .pool
                .clone()
                .unwrap_or_else(|| "10.0.0.0/24".to_string())],
        },
    };

    let cfgstr = toml::to_string(&cfg)?;

    let mut cfgfile = File::create(&ARGS.config)?;
    cfgfile.write_all(cfgstr.as_bytes())?;

    Ok(())
}
