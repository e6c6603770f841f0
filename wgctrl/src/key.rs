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

//! WireGuard key material: x25519 key pairs and preshared keys, base64 encoded
//! the same way `wg genkey`, `wg pubkey` and `wg genpsk` print them.

use std::convert::TryInto;

// Raw crypto primitives
use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::scalar::Scalar;
use rand_core::{OsRng, RngCore};

use crate::error::WgctrlError;

pub const KEY_LENGTH: usize = 32;

fn decode_key(key: &str, what: &str) -> Result<[u8; KEY_LENGTH], WgctrlError> {
    match base64::decode(key.trim()) {
        Ok(x) => match (x.as_slice().try_into()) as Result<[u8; KEY_LENGTH], _> {
            Ok(x) => Ok(x),
            Err(_) => Err(WgctrlError::BadParameter {
                msg: format!("Bad {}: wrong size", what),
            }),
        },
        Err(_) => Err(WgctrlError::BadParameter {
            msg: format!("Bad {}: not in b64 format!", what),
        }),
    }
}

fn clamp(mut key: [u8; KEY_LENGTH]) -> [u8; KEY_LENGTH] {
    key[0] &= 248;
    key[31] &= 127;
    key[31] |= 64;
    key
}

fn random_bytes() -> [u8; KEY_LENGTH] {
    let mut bytes = [0u8; KEY_LENGTH];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

fn public_from_private(private_key: [u8; KEY_LENGTH]) -> String {
    let point = (&ED25519_BASEPOINT_TABLE * &Scalar::from_bits(clamp(private_key))).to_montgomery();
    base64::encode(point.to_bytes())
}

/// Checks that `key` is base64 of exactly 32 bytes.
pub fn validate_key(key: &str) -> Result<(), WgctrlError> {
    decode_key(key, "key").map(|_| ())
}

pub fn derive_public(private_key: &str) -> Result<String, WgctrlError> {
    Ok(public_from_private(decode_key(private_key, "private key")?))
}

/// Returns `(private, public)`.
pub fn generate_keypair() -> (String, String) {
    let private_key = clamp(random_bytes());
    (
        base64::encode(private_key),
        public_from_private(private_key),
    )
}

pub fn generate_preshared() -> String {
    base64::encode(random_bytes())
}
