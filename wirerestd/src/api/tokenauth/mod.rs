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

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

use super::AuthKeyProvider;

pub struct ApiKey;

/// `expected` is either an argon2 PHC string or a plain token.
pub(crate) fn verify_token(expected: &str, token: &str) -> bool {
    match PasswordHash::new(expected) {
        Ok(hash) => Argon2::default()
            .verify_password(token.as_bytes(), &hash)
            .is_ok(),
        Err(_) => expected == token,
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ApiKey {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let key = match req.rocket().state::<AuthKeyProvider>() {
            Some(x) => &x.auth_key,
            None => return Outcome::Error((Status::InternalServerError, ())),
        };
        let key = match key {
            Some(x) => x,
            None => return Outcome::Success(Self),
        };

        let keys: Vec<&str> = req.headers().get("Authorization").collect();
        match keys.len() {
            1 => {
                let token = keys[0].strip_prefix("Bearer ").unwrap_or(keys[0]);
                match verify_token(key, token.trim()) {
                    true => Outcome::Success(Self),
                    false => Outcome::Error((Status::Unauthorized, ())),
                }
            }
            _ => Outcome::Error((Status::Unauthorized, ())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};

    #[test]
    fn test_verify_token() {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password("crowbar".as_bytes(), &salt)
            .unwrap()
            .to_string();

        assert!(verify_token(&hash, "crowbar"));
        assert!(!verify_token(&hash, "crowbar2"));
        assert!(verify_token("plain-token", "plain-token"));
        assert!(!verify_token("plain-token", "other"));
    }
}
