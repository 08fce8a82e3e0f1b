//! Ledger client over a Firebase-style realtime database REST API.
//!
//! Layout:
//!
//! ```text
//! nfc_index/<card-id>            -> "<account-id>"
//! usuarios/<account-id>          -> { usuario_nombre, usuario_email, usuario_puntos, puntos/... }
//! usuarios/<id>/puntos/<claim>   -> history entry, keyed by claim id
//! contenedor/<container>         -> latest fill-level status
//! ```

use async_trait::async_trait;
use claim_core::collaborators::{Account, GrantReceipt, GrantRequest, IdentityLookup, Ledger};
use claim_core::error::AdapterError;
use claim_core::telemetry::TelemetryRecord;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tracing::{debug, warn};

/// Map a transport error onto the adapter taxonomy.
pub fn from_reqwest(err: reqwest::Error) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout
    } else if err.is_connect() {
        AdapterError::Unavailable(err.to_string())
    } else if err.is_decode() {
        AdapterError::Malformed(err.to_string())
    } else if let Some(status) = err.status() {
        from_status(status)
    } else {
        AdapterError::Other(err.into())
    }
}

fn from_status(status: StatusCode) -> AdapterError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AdapterError::Unavailable(format!("ledger returned {}", status))
    } else {
        AdapterError::Rejected(format!("ledger returned {}", status))
    }
}

fn check_status(resp: Response) -> Result<Response, AdapterError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(from_status(status))
    }
}

pub struct HttpLedger {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpLedger {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}.json", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.auth_token {
            Some(token) => builder.query(&[("auth", token)]),
            None => builder,
        }
    }

    async fn get_json(&self, path: &str) -> Result<Value, AdapterError> {
        let resp = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(from_reqwest)?;
        check_status(resp)?.json().await.map_err(from_reqwest)
    }

    async fn patch_json(&self, path: &str, body: &Value) -> Result<(), AdapterError> {
        let resp = self
            .request(Method::PATCH, path)
            .json(body)
            .send()
            .await
            .map_err(from_reqwest)?;
        check_status(resp)?;
        Ok(())
    }
}

#[async_trait]
impl IdentityLookup for HttpLedger {
    async fn lookup(&self, card_id: &str) -> Result<Option<Account>, AdapterError> {
        let account_id = match self.get_json(&format!("nfc_index/{}", card_id)).await? {
            Value::Null => return Ok(None),
            Value::String(id) if !id.is_empty() => id,
            other => {
                return Err(AdapterError::Malformed(format!(
                    "unexpected nfc_index entry: {}",
                    other
                )));
            }
        };

        let user = self.get_json(&format!("usuarios/{}", account_id)).await?;
        if user.is_null() {
            debug!(card = %card_id, account = %account_id, "Card points at a missing account");
            return Ok(None);
        }

        let display_name = ["usuario_nombre", "usuario_email"]
            .iter()
            .find_map(|key| {
                user.get(*key)
                    .and_then(Value::as_str)
                    .filter(|name| !name.is_empty())
            })
            .unwrap_or(&account_id)
            .to_string();

        Ok(Some(Account {
            account_id,
            display_name,
        }))
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn grant_points(&self, request: &GrantRequest) -> Result<GrantReceipt, AdapterError> {
        let account = &request.account_id;
        let balance_path = format!("usuarios/{}/usuario_puntos", account);
        let now_ms = chrono::Utc::now().timestamp_millis();

        // Nothing is written yet, so a failure here is safe to retry
        let before = match self.get_json(&balance_path).await? {
            Value::Null => 0,
            other => other.as_u64().ok_or_else(|| {
                AdapterError::Malformed(format!("unexpected points balance: {}", other))
            })?,
        };

        // Multi-path update: the increment and the history entry land together
        let mut update = Map::new();
        update.insert(
            format!("usuarios/{}/usuario_puntos", account),
            json!({ ".sv": { "increment": request.points } }),
        );
        update.insert(
            format!("usuarios/{}/puntos/{}", account, request.claim_id),
            json!({
                "punto_cantidad": request.points,
                "punto_descripcion": format!("Recycling completed ({})", request.material),
                "punto_fecha": now_ms,
                "punto_tipo": "ganado",
                "punto_userId": account,
            }),
        );
        self.patch_json("", &Value::Object(update)).await?;

        // The increment is committed from here on: the grant must not fail
        let expected = before + u64::from(request.points);
        let new_total = match self.get_json(&balance_path).await {
            Ok(total) => total.as_u64().unwrap_or_else(|| {
                warn!(account = %account, %total, "Unexpected balance after grant");
                expected
            }),
            Err(e) => {
                warn!(account = %account, error = %e, "Balance read-back failed after grant");
                expected
            }
        };

        Ok(GrantReceipt {
            points_granted: request.points,
            new_total,
        })
    }

    async fn update_telemetry(&self, record: &TelemetryRecord) -> Result<(), AdapterError> {
        let body = json!({
            "estado": record.state.as_wire(),
            "porcentaje": record.percent,
            "distance_cm": record.distance_cm,
            "deviceId": record.device_id,
            "timestamp": record.ts,
            "updatedAt": chrono::Utc::now().timestamp_millis(),
        });
        self.patch_json(&format!("contenedor/{}", record.target.as_wire()), &body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claim_core::claim::ClaimId;
    use claim_core::material::Material;
    use claim_core::telemetry::{ContainerId, FillState};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ledger(server: &MockServer) -> HttpLedger {
        HttpLedger::new(&server.uri(), Some("secret".into()), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_lookup_known_card() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nfc_index/04A1B2C3.json"))
            .and(query_param("auth", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("uid-1")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/usuarios/uid-1.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "usuario_nombre": "Ana",
                "usuario_email": "ana@example.com",
                "usuario_puntos": 100
            })))
            .mount(&server)
            .await;

        let account = ledger(&server).lookup("04A1B2C3").await.unwrap().unwrap();
        assert_eq!(account.account_id, "uid-1");
        assert_eq!(account.display_name, "Ana");
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_email() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nfc_index/AA.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("uid-2")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/usuarios/uid-2.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "usuario_email": "bo@example.com" })),
            )
            .mount(&server)
            .await;

        let account = ledger(&server).lookup("AA").await.unwrap().unwrap();
        assert_eq!(account.display_name, "bo@example.com");
    }

    #[tokio::test]
    async fn test_lookup_unknown_card() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/nfc_index/DEADBEEF.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Null))
            .mount(&server)
            .await;

        assert_eq!(ledger(&server).lookup("DEADBEEF").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lookup_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = ledger(&server).lookup("04A1").await.unwrap_err();
        assert!(matches!(err, AdapterError::Unavailable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_unauthorized_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = ledger(&server).lookup("04A1").await.unwrap_err();
        assert!(matches!(err, AdapterError::Rejected(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_slow_ledger_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!("uid-1"))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let ledger =
            HttpLedger::new(&server.uri(), None, Duration::from_millis(100)).unwrap();
        let err = ledger.lookup("04A1").await.unwrap_err();
        assert!(matches!(err, AdapterError::Timeout));
    }

    #[tokio::test]
    async fn test_grant_writes_increment_and_history_together() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/usuarios/uid-1/usuario_puntos.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(100)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/usuarios/uid-1/usuario_puntos.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(130)))
            .mount(&server)
            .await;

        let claim_id = ClaimId::new();
        let receipt = ledger(&server)
            .grant_points(&GrantRequest {
                claim_id,
                account_id: "uid-1".into(),
                material: Material::Aluminum,
                points: 30,
            })
            .await
            .unwrap();
        assert_eq!(
            receipt,
            GrantReceipt {
                points_granted: 30,
                new_total: 130
            }
        );

        let requests = server.received_requests().await.unwrap();
        let patch = requests
            .iter()
            .find(|r| r.method.as_str() == "PATCH")
            .unwrap();
        let body: Value = serde_json::from_slice(&patch.body).unwrap();
        assert_eq!(
            body["usuarios/uid-1/usuario_puntos"],
            json!({ ".sv": { "increment": 30 } })
        );
        let entry = &body[format!("usuarios/uid-1/puntos/{}", claim_id).as_str()];
        assert_eq!(entry["punto_cantidad"], 30);
        assert_eq!(entry["punto_tipo"], "ganado");
        assert_eq!(entry["punto_userId"], "uid-1");
        assert_eq!(entry["punto_descripcion"], "Recycling completed (aluminum)");
    }

    fn grant_request() -> GrantRequest {
        GrantRequest {
            claim_id: ClaimId::new(),
            account_id: "uid-1".into(),
            material: Material::Plastic,
            points: 30,
        }
    }

    fn patch_count(requests: &[wiremock::Request]) -> usize {
        requests
            .iter()
            .filter(|r| r.method.as_str() == "PATCH")
            .count()
    }

    #[tokio::test]
    async fn test_committed_grant_survives_failed_read_back() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/usuarios/uid-1/usuario_puntos.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(100)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/usuarios/uid-1/usuario_puntos.json"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = ledger(&server).grant_points(&grant_request()).await.unwrap();
        assert_eq!(
            receipt,
            GrantReceipt {
                points_granted: 30,
                new_total: 130
            }
        );
        let requests = server.received_requests().await.unwrap();
        assert_eq!(patch_count(&requests), 1);
    }

    #[tokio::test]
    async fn test_grant_on_new_account_starts_from_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/usuarios/uid-1/usuario_puntos.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Null))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let receipt = ledger(&server).grant_points(&grant_request()).await.unwrap();
        assert_eq!(receipt.new_total, 30);
    }

    #[tokio::test]
    async fn test_failed_balance_read_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let err = ledger(&server).grant_points(&grant_request()).await.unwrap_err();
        assert!(err.is_transient());
        let requests = server.received_requests().await.unwrap();
        assert_eq!(patch_count(&requests), 0);
    }

    #[tokio::test]
    async fn test_update_telemetry_patches_container() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/contenedor/conteAluminio.json"))
            .and(query_param("auth", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        ledger(&server)
            .update_telemetry(&TelemetryRecord {
                target: ContainerId::Aluminum,
                percent: 92,
                state: FillState::Full,
                distance_cm: 3.5,
                device_id: "esp32-b".into(),
                ts: 1_700_000_123,
            })
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["estado"], "Lleno");
        assert_eq!(body["porcentaje"], 92);
        assert_eq!(body["deviceId"], "esp32-b");
        assert_eq!(body["timestamp"], 1_700_000_123);
        assert!(body["updatedAt"].as_i64().is_some());
    }
}
