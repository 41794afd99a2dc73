use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use modgate_api::app::{router_with, services::AppServices};
use modgate_auth::{Hs256JwtValidator, JwtClaims, NewUser, Role};
use modgate_catalog::{Module, ModulePatch};
use modgate_core::{Category, ModuleId, UserId};
use modgate_infra::{
    CatalogService, EntitlementService, InMemoryEntitlementStore, InMemoryIconStorage, InMemoryModuleCatalog,
    InMemoryUserDirectory, ModuleCatalogStore, StoreError, UserDirectory,
};

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over in-memory stores, bound to an ephemeral port.
        let services = Arc::new(AppServices::in_memory(Arc::new(InMemoryIconStorage::new())));
        Self::spawn_with(services, Duration::from_secs(5)).await
    }

    async fn spawn_with(services: Arc<AppServices>, timeout: Duration) -> Self {
        let jwt = Arc::new(Hs256JwtValidator::new(SECRET.as_bytes().to_vec()));
        let app = router_with(services.clone(), jwt, timeout);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn seed_user(&self, username: &str, category: &str) -> UserId {
        let user = NewUser {
            username: username.to_string(),
            display_name: username.to_string(),
            credential_hash: "x".to_string(),
            email: format!("{username}@example.ac.id"),
            phone: String::new(),
            gender: 1,
            photo: None,
            category: Category::new(category).unwrap(),
            role: Role::new("civitas"),
        }
        .into_user(UserId::new(), Utc::now())
        .unwrap();
        let id = user.id;
        self.services.users.insert(user).await.unwrap();
        id
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(role: Role) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: "tester".to_string(),
        role,
        category: None,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn create_module(client: &reqwest::Client, srv: &TestServer, token: &str, name: &str, order: i32) -> String {
    let res = client
        .post(srv.url("/admin/modul"))
        .bearer_auth(token)
        .json(&json!({ "nm_modul": name, "urutan": order, "is_aktif": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/admin/modul")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn non_admin_roles_are_limited() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/admin/modul"))
        .bearer_auth(mint_jwt(Role::new("civitas")))
        .json(&json!({ "nm_modul": "Jadwal" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");

    // Operators can read but not write.
    let operator = mint_jwt(Role::new("operator"));
    let res = client
        .get(srv.url("/admin/usermodul"))
        .bearer_auth(&operator)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .put(srv.url("/admin/changeusertype"))
        .bearer_auth(&operator)
        .json(&json!({ "user_id": UserId::new().to_string(), "new_type": "dosen", "new_moduls": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn module_catalog_lifecycle() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = mint_jwt(Role::ADMIN);

    let nilai = create_module(&client, &srv, &token, "Nilai", 2).await;
    create_module(&client, &srv, &token, "Jadwal", 1).await;

    let res = client
        .get(srv.url("/admin/allmoduls"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let names: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["nm_modul"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["Jadwal", "Nilai"]);

    let res = client
        .put(srv.url(&format!("/admin/modul/{nilai}")))
        .bearer_auth(&token)
        .json(&json!({ "is_aktif": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["is_aktif"], false);
    assert_eq!(body["nm_modul"], "Nilai");

    // Fields outside the updatable set are refused.
    let res = client
        .put(srv.url(&format!("/admin/modul/{nilai}")))
        .bearer_auth(&token)
        .json(&json!({ "created_at": "2020-01-01T00:00:00Z" }))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_client_error());

    let res = client
        .delete(srv.url(&format!("/admin/modul/{nilai}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .get(srv.url(&format!("/admin/modul/{nilai}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url("/admin/modul/not-a-uuid"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_identifier");
}

#[tokio::test]
async fn grants_flow_through_records() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = mint_jwt(Role::ADMIN);

    let u1 = srv.seed_user("budi", "mahasiswa").await;
    let m1 = create_module(&client, &srv, &token, "Jadwal", 1).await;
    let m2 = create_module(&client, &srv, &token, "Nilai", 2).await;

    let res = client
        .post(srv.url("/admin/usermodul"))
        .bearer_auth(&token)
        .json(&json!({
            "jenis_user": "mahasiswa",
            "user_id": [u1.to_string()],
            "modul_id": [m1, m1],
            "catatan": "angkatan 2024",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let record: Value = res.json().await.unwrap();
    let record_id = record["id"].as_str().unwrap().to_string();
    assert_eq!(record["modul_id"].as_array().unwrap().len(), 1);

    let assign = json!({ "user_id": u1.to_string(), "modul_id": m2 });
    let res = client
        .post(srv.url("/admin/usermodul/assign"))
        .bearer_auth(&token)
        .json(&assign)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(srv.url("/admin/usermodul/assign"))
        .bearer_auth(&token)
        .json(&assign)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "already_granted");

    let res = client
        .get(srv.url(&format!("/admin/usermodul/user/{u1}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["modules"], json!(["Jadwal", "Nilai"]));
    assert_eq!(body["total_count"], 2);

    // Bulk delete pulls exactly the named modules.
    let res = client
        .post(srv.url("/admin/usermodul/manage"))
        .bearer_auth(&token)
        .json(&json!({ "user_ids": [u1.to_string()], "modul_ids": [m1], "action": "delete" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["records_modified"], 1);

    let res = client
        .get(srv.url(&format!("/admin/usermodul/{record_id}")))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["modul_id"], json!([m2]));
    assert_eq!(body["catatan"], "angkatan 2024");

    let res = client
        .post(srv.url("/admin/usermodul/manage"))
        .bearer_auth(&token)
        .json(&json!({ "user_ids": [u1.to_string()], "modul_ids": [m1], "action": "grant" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_action");

    let res = client
        .post(srv.url("/admin/usermodul/revoke"))
        .bearer_auth(&token)
        .json(&json!({ "user_id": u1.to_string(), "modul_id": m1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "module_not_granted");
}

#[tokio::test]
async fn change_user_type_moves_user_between_categories() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = mint_jwt(Role::ADMIN);

    let u1 = srv.seed_user("sari", "mahasiswa").await;
    let m1 = create_module(&client, &srv, &token, "Jadwal", 1).await;
    let m2 = create_module(&client, &srv, &token, "Penelitian", 2).await;
    let m3 = create_module(&client, &srv, &token, "Bimbingan", 3).await;

    let res = client
        .post(srv.url("/admin/usermodul"))
        .bearer_auth(&token)
        .json(&json!({ "jenis_user": "mahasiswa", "user_id": [u1.to_string()], "modul_id": [m1] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = client
        .put(srv.url("/admin/changeusertype"))
        .bearer_auth(&token)
        .json(&json!({ "user_id": u1.to_string(), "new_type": "dosen", "new_moduls": [m2, m3] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: Value = res.json().await.unwrap();
    assert_eq!(report["previous_category"], "mahasiswa");
    assert_eq!(report["new_category"], "dosen");
    assert_eq!(report["detached_from"], 1);
    assert_eq!(report["target_created"], true);

    let res = client
        .get(srv.url("/admin/usermodul"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    let uid = json!(u1.to_string());
    for record in body["items"].as_array().unwrap() {
        let has_user = record["user_id"].as_array().unwrap().contains(&uid);
        match record["jenis_user"].as_str().unwrap() {
            "dosen" => {
                assert!(has_user);
                assert_eq!(record["modul_id"], json!([m2, m3]));
            }
            _ => assert!(!has_user),
        }
    }

    let user = srv.services.users.get(u1).await.unwrap().unwrap();
    assert_eq!(user.category.as_str(), "dosen");

    let res = client
        .put(srv.url("/admin/changeusertype"))
        .bearer_auth(&token)
        .json(&json!({ "user_id": "bogus", "new_type": "dosen", "new_moduls": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

/// Catalog whose listing stalls longer than any request budget used here.
struct StalledCatalog {
    inner: InMemoryModuleCatalog,
    delay: Duration,
}

#[async_trait]
impl ModuleCatalogStore for StalledCatalog {
    async fn insert(&self, module: Module) -> Result<(), StoreError> {
        self.inner.insert(module).await
    }

    async fn get(&self, id: ModuleId) -> Result<Option<Module>, StoreError> {
        self.inner.get(id).await
    }

    async fn list(&self) -> Result<Vec<Module>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.list().await
    }

    async fn apply_patch(
        &self,
        id: ModuleId,
        patch: &ModulePatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Module>, StoreError> {
        self.inner.apply_patch(id, patch, now).await
    }

    async fn delete(&self, id: ModuleId) -> Result<Option<Module>, StoreError> {
        self.inner.delete(id).await
    }

    async fn names(&self, ids: &[ModuleId]) -> Result<Vec<(ModuleId, String)>, StoreError> {
        self.inner.names(ids).await
    }
}

#[tokio::test]
async fn slow_request_answers_408_timeout() {
    let users: Arc<dyn UserDirectory> = Arc::new(InMemoryUserDirectory::new());
    let modules = Arc::new(StalledCatalog {
        inner: InMemoryModuleCatalog::new(),
        delay: Duration::from_secs(2),
    });
    let services = Arc::new(AppServices {
        catalog: CatalogService::new(modules.clone(), Arc::new(InMemoryIconStorage::new())),
        entitlements: EntitlementService::new(users.clone(), modules, Arc::new(InMemoryEntitlementStore::new())),
        users,
    });
    let srv = TestServer::spawn_with(services, Duration::from_millis(50)).await;
    let client = reqwest::Client::new();

    let res = client
        .get(srv.url("/admin/allmoduls"))
        .bearer_auth(mint_jwt(Role::ADMIN))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::REQUEST_TIMEOUT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "timeout");

    // Fast routes under the same budget still answer.
    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
