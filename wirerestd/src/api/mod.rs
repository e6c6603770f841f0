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

use std::sync::Arc;

use log::error;
use rocket::fairing::AdHoc;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{Request, State};

use crate::metrics::Metrics;
use crate::peer::PeerService;

use self::common::{error_status, ApiError, PeerServiceStore, PrometheusStore};
use self::tokenauth::ApiKey;

pub(crate) mod common;
mod interface;
pub(crate) mod tokenauth;
mod v1;

pub(crate) struct AuthKeyProvider {
    auth_key: Option<String>,
}

#[get("/metrics")]
async fn prometheus(
    _apikey: ApiKey,
    svc_store: &State<PeerServiceStore>,
    prom_store: &State<PrometheusStore>,
) -> (Status, String) {
    let metrics = &prom_store.metrics;

    // Transfer counters are only known to the backend
    match svc_store.service.peers().await {
        Ok(peers) => metrics.observe_transfer(&peers),
        Err(e) => return (error_status(&e), e.to_string()),
    }

    match metrics.render() {
        Ok(x) => (Status::Ok, x),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (Status::InternalServerError, e.to_string())
        }
    }
}

#[catch(default)]
fn default_catcher(status: Status, _req: &Request) -> (Status, Json<ApiError>) {
    let message = match status.code {
        401 => "Unauthorized",
        404 => "Resource not found",
        422 => "Malformed request parameters",
        _ => status.reason_lossy(),
    };
    (status, ApiError::new(status, message))
}

pub(crate) fn stage(key: Option<String>, service: Arc<PeerService>, metrics: Arc<Metrics>) -> AdHoc {
    AdHoc::on_ignite("API", |rocket| async {
        rocket
            .attach(v1::stage())
            .mount("/", routes![interface::get_interface, prometheus])
            .register("/", catchers![default_catcher])
            .manage(AuthKeyProvider { auth_key: key })
            .manage(PeerServiceStore { service })
            .manage(PrometheusStore { metrics })
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Pools;
    use rocket::http::Header;
    use rocket::local::asynchronous::Client;
    use rocket::serde::json::Value;
    use std::time::Duration;
    use wgctrl::key;
    use wgctrl::memory::MemoryBackend;

    async fn client(pool: &str, apikey: Option<&str>) -> Client {
        let pools = Pools {
            v4: vec![pool.parse().unwrap()],
            ..Default::default()
        };
        let (service, metrics) = crate::peer::bootstrap_with(
            Arc::new(MemoryBackend::new()),
            pools,
            Duration::from_secs(5),
            None,
        )
        .await
        .unwrap();

        let rocket = rocket::build().attach(stage(apikey.map(|x| x.to_string()), service, metrics));
        Client::tracked(rocket).await.unwrap()
    }

    fn enc(s: &str) -> String {
        s.replace('+', "%2B").replace('/', "%2F").replace('=', "%3D")
    }

    async fn call(client: &Client, method: &str, uri: &str) -> (Status, Value) {
        let request = match method {
            "GET" => client.get(uri),
            "POST" => client.post(uri),
            "PATCH" => client.patch(uri),
            "DELETE" => client.delete(uri),
            _ => unreachable!(),
        };
        let response = request.dispatch().await;
        let status = response.status();
        (status, response.into_json::<Value>().await.unwrap())
    }

    #[rocket::async_test]
    async fn test_paging_validation() {
        let client = client("10.0.0.0/30", None).await;

        let (status, body) = call(&client, "GET", "/v1/peers?page=-1&limit=2").await;
        assert_eq!(status, Status::BadRequest);
        assert_eq!(body["code"], 400);
        assert!(body["message"].as_str().unwrap().contains("page"));

        let (status, body) = call(&client, "GET", "/v1/peers?page=0&limit=-1").await;
        assert_eq!(status, Status::BadRequest);
        assert!(body["message"].as_str().unwrap().contains("limit"));

        let (status, _) = call(&client, "GET", "/v1/peers?sort=Height.asc").await;
        assert_eq!(status, Status::BadRequest);

        let (status, body) = call(&client, "GET", "/v1/peers").await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["totalPages"], 0);
        assert_eq!(body["content"].as_array().unwrap().len(), 0);
    }

    #[rocket::async_test]
    async fn test_create_and_list() {
        let client = client("10.0.0.0/30", None).await;

        let (status, body) = call(&client, "POST", "/v1/peers").await;
        assert_eq!(status, Status::Created);
        assert!(body["privateKey"].is_string());
        assert!(body["publicKey"].is_string());
        assert!(body["presharedKey"].is_string());
        assert_eq!(body["allowedIps"], rocket::serde::json::json!(["10.0.0.0/32"]));

        let public_key = key::generate_keypair().1;
        let uri = format!(
            "/v1/peers?publicKey={}&allowedIps=10.0.0.2&persistentKeepalive=25",
            enc(&public_key)
        );
        let (status, body) = call(&client, "POST", &uri).await;
        assert_eq!(status, Status::Created);
        assert!(body["privateKey"].is_null());
        assert!(body["presharedKey"].is_null());
        assert_eq!(body["allowedIps"], rocket::serde::json::json!(["10.0.0.2/32"]));
        assert_eq!(body["persistentKeepalive"], 25);

        let (status, body) =
            call(&client, "GET", "/v1/peers?page=0&limit=1&sort=PublicKey.desc").await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["totalPages"], 2);
        assert_eq!(body["currentPage"], 0);
        assert_eq!(body["content"].as_array().unwrap().len(), 1);

        let uri = format!("/v1/peers/find?publicKey={}", enc(&public_key));
        let (status, body) = call(&client, "GET", &uri).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["publicKey"], public_key.as_str());
        assert_eq!(body["transferRx"], 0);
    }

    #[rocket::async_test]
    async fn test_create_errors() {
        let client = client("10.0.0.0/31", None).await;

        let (status, _) = call(&client, "POST", "/v1/peers?allowedIps=10.0.0.1/24").await;
        assert_eq!(status, Status::BadRequest);

        let (status, _) = call(&client, "POST", "/v1/peers?allowedIps=10.0.0.1").await;
        assert_eq!(status, Status::Created);
        let (status, _) = call(&client, "POST", "/v1/peers?allowedIps=10.0.0.1").await;
        assert_eq!(status, Status::Conflict);

        let (status, _) = call(&client, "POST", "/v1/peers").await;
        assert_eq!(status, Status::Created);
        let (status, body) = call(&client, "POST", "/v1/peers").await;
        assert_eq!(status, Status::InternalServerError);
        assert_eq!(body["code"], 500);
        assert!(body["message"].as_str().unwrap().contains("ip"));
    }

    #[rocket::async_test]
    async fn test_find_update_delete() {
        let client = client("10.0.0.0/24", None).await;

        let uri = format!("/v1/peers/find?publicKey={}", enc(&key::generate_keypair().1));
        let (status, body) = call(&client, "GET", &uri).await;
        assert_eq!(status, Status::NotFound);
        assert!(body["message"].as_str().unwrap().contains("not found"));

        let (_, created) = call(&client, "POST", "/v1/peers").await;
        let public_key = created["publicKey"].as_str().unwrap().to_string();

        let uri = format!(
            "/v1/peers?publicKey={}&allowedIps=10.0.0.7,10.0.0.8/30&persistentKeepalive=15",
            enc(&public_key)
        );
        let (status, body) = call(&client, "PATCH", &uri).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(
            body["allowedIps"],
            rocket::serde::json::json!(["10.0.0.7/32", "10.0.0.8/30"])
        );
        assert_eq!(body["persistentKeepalive"], 15);

        let uri = format!("/v1/peers?publicKey={}", enc(&public_key));
        let (status, body) = call(&client, "DELETE", &uri).await;
        assert_eq!(status, Status::Ok);
        assert_eq!(body["publicKey"], public_key.as_str());

        let (status, _) = call(&client, "DELETE", &uri).await;
        assert_eq!(status, Status::NotFound);

        // the released address is handed out again
        let (_, created) = call(&client, "POST", "/v1/peers").await;
        assert_eq!(created["allowedIps"], rocket::serde::json::json!(["10.0.0.0/32"]));
    }

    #[rocket::async_test]
    async fn test_interface_and_metrics() {
        let client = client("10.0.0.0/24", None).await;

        let (status, body) = call(&client, "GET", "/interface").await;
        assert_eq!(status, Status::Ok);
        assert!(body["publicKey"].is_string());
        assert_eq!(body["listenPort"], 51820);
        assert!(body.get("privateKey").is_none());

        call(&client, "POST", "/v1/peers").await;
        let response = client.get("/metrics").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let text = response.into_string().await.unwrap();
        assert!(text.contains("wirerest_peers 1"));
        assert!(text.contains("wirerest_used_v4_ips 1"));
        assert!(text.contains("wirerest_peers_created_total 1"));
        assert!(text.contains("wirerest_peer_transfer_rx_bytes{public_key="));
    }

    #[rocket::async_test]
    async fn test_authentication() {
        let client = client("10.0.0.0/24", Some("crowbar")).await;

        let (status, body) = call(&client, "GET", "/interface").await;
        assert_eq!(status, Status::Unauthorized);
        assert_eq!(body["code"], 401);

        let response = client
            .get("/interface")
            .header(Header::new("Authorization", "Bearer crowbar"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get("/v1/peers")
            .header(Header::new("Authorization", "crowbar"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let response = client
            .get("/metrics")
            .header(Header::new("Authorization", "Bearer wrong"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);

        let (status, body) = call(&client, "GET", "/v2/nothing").await;
        assert_eq!(status, Status::NotFound);
        assert_eq!(body["code"], 404);
    }
}
