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

use crate::api::common::{err, ok, ApiResponseType, PeerServiceStore};
use crate::api::tokenauth::ApiKey;

use super::types::{
    CreatePeerQuery, CreatedPeerDto, PageDto, PageQuery, PeerDto, PeerKeyQuery, UpdatePeerQuery,
};

#[get("/peers?<paging..>")]
pub(crate) async fn get_peers(
    _apikey: ApiKey,
    store: &State<PeerServiceStore>,
    paging: PageQuery,
) -> ApiResponseType<PageDto<PeerDto>> {
    let request = match paging.to_request() {
        Ok(x) => x,
        Err(e) => return err(&e),
    };

    match store.service.list_peers(&request).await {
        Ok(page) => ok(Status::Ok, page.into()),
        Err(e) => err(&e),
    }
}

#[get("/peers/find?<query..>")]
pub(crate) async fn find_peer(
    _apikey: ApiKey,
    store: &State<PeerServiceStore>,
    query: PeerKeyQuery,
) -> ApiResponseType<PeerDto> {
    match store.service.find_by_public_key(&query.public_key).await {
        Ok(peer) => ok(Status::Ok, peer.into()),
        Err(e) => err(&e),
    }
}

#[post("/peers?<query..>")]
pub(crate) async fn create_peer(
    _apikey: ApiKey,
    store: &State<PeerServiceStore>,
    query: CreatePeerQuery,
) -> ApiResponseType<CreatedPeerDto> {
    let request = match query.to_request() {
        Ok(x) => x,
        Err(e) => return err(&e),
    };

    match store.service.create_peer(request).await {
        Ok(created) => ok(Status::Created, created.into()),
        Err(e) => err(&e),
    }
}

#[patch("/peers?<query..>")]
pub(crate) async fn update_peer(
    _apikey: ApiKey,
    store: &State<PeerServiceStore>,
    query: UpdatePeerQuery,
) -> ApiResponseType<PeerDto> {
    let update = match query.to_update() {
        Ok(x) => x,
        Err(e) => return err(&e),
    };

    match store
        .service
        .update_peer(query.public_key.clone(), update)
        .await
    {
        Ok(peer) => ok(Status::Ok, peer.into()),
        Err(e) => err(&e),
    }
}

#[delete("/peers?<query..>")]
pub(crate) async fn delete_peer(
    _apikey: ApiKey,
    store: &State<PeerServiceStore>,
    query: PeerKeyQuery,
) -> ApiResponseType<PeerDto> {
    match store.service.delete_peer(query.public_key.clone()).await {
        Ok(peer) => ok(Status::Ok, peer.into()),
        Err(e) => err(&e),
    }
}
