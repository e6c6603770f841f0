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

use rocket::http::Status;
use rocket::State;

use super::common::{err, ok, ApiResponseType, PeerServiceStore};
use super::tokenauth::ApiKey;
use super::v1::InterfaceDto;

#[get("/interface")]
pub(crate) async fn get_interface(
    _apikey: ApiKey,
    store: &State<PeerServiceStore>,
) -> ApiResponseType<InterfaceDto> {
    match store.service.interface().await {
        Ok(iface) => ok(Status::Ok, iface.into()),
        Err(e) => err(&e),
    }
}
