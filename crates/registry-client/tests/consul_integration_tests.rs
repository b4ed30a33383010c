use mockito::{Matcher, Server, ServerGuard};
use registry_client::{
    Backend, ConsulClient, EndpointRotator, FanoutClient, FixedClient, InstanceQuery,
    InstanceStatus, RegistrationBackend, RegistryClient, RegistryError, ServiceInstance,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

async fn setup_mock_server() -> ServerGuard {
    Server::new_async().await
}

fn client(server: &ServerGuard) -> ConsulClient {
    let rotator = Arc::new(EndpointRotator::new([server.url()]).unwrap());
    ConsulClient::new(rotator, Duration::from_secs(2), Duration::from_secs(30))
}

fn catalog_entry(id: &str, version: &str) -> serde_json::Value {
    serde_json::json!({
        "Node": "node-1",
        "Address": "10.0.0.5",
        "ServiceID": id,
        "ServiceName": "billing",
        "ServiceAddress": "10.0.1.5",
        "ServicePort": 7000,
        "ServiceMeta": { "version": version }
    })
}

fn instance() -> ServiceInstance {
    ServiceInstance::new("billing", "BILLING-1", "billing.local", 7000)
        .with_ip("10.0.1.5")
        .with_version("2.0.0")
        .with_status(InstanceStatus::Up)
}

#[tokio::test]
async fn test_register_sends_ttl_check() {
    let mut server = setup_mock_server().await;

    let mock = server
        .mock("PUT", "/v1/agent/service/register")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "ID": "BILLING-1",
            "Name": "billing",
            "Address": "10.0.1.5",
            "Port": 7000,
            "Check": { "CheckID": "service:BILLING-1", "TTL": "30s" }
        })))
        .with_status(200)
        .create_async()
        .await;

    let client = client(&server);
    let result = client.register(&server.url(), &instance()).await;

    mock.assert_async().await;
    assert_eq!(assert_ok!(result), "BILLING-1");
}

#[tokio::test]
async fn test_heartbeat_passes_ttl_check() {
    let mut server = setup_mock_server().await;

    let mock = server
        .mock("PUT", "/v1/agent/check/pass/service:BILLING-1")
        .with_status(200)
        .create_async()
        .await;

    let client = client(&server);
    assert_ok!(client.heartbeat(&server.url(), &instance()).await);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_heartbeat_for_unknown_check_is_not_found() {
    let mut server = setup_mock_server().await;

    let _mock = server
        .mock("PUT", "/v1/agent/check/pass/service:BILLING-1")
        .with_status(500)
        .with_body("Unknown check \"service:BILLING-1\"")
        .create_async()
        .await;

    let client = client(&server);
    let err = assert_err!(client.heartbeat(&server.url(), &instance()).await);
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_status_down_enables_maintenance() {
    let mut server = setup_mock_server().await;

    let register = server
        .mock("PUT", "/v1/agent/service/register")
        .with_status(200)
        .create_async()
        .await;
    let maintenance = server
        .mock("PUT", "/v1/agent/service/maintenance/BILLING-1")
        .match_query(Matcher::UrlEncoded("enable".into(), "true".into()))
        .with_status(200)
        .create_async()
        .await;

    let client = client(&server);
    let down = instance().with_status(InstanceStatus::Down);
    assert_ok!(client.update_status(&server.url(), &down).await);

    register.assert_async().await;
    maintenance.assert_async().await;
}

#[tokio::test]
async fn test_unregister_deregisters_service() {
    let mut server = setup_mock_server().await;

    let mock = server
        .mock("PUT", "/v1/agent/service/deregister/BILLING-1")
        .with_status(200)
        .create_async()
        .await;

    let client = client(&server);
    assert_ok!(client.unregister(&server.url(), &instance()).await);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_find_all_from_catalog() {
    let mut server = setup_mock_server().await;

    let mock = server
        .mock("GET", "/v1/catalog/service/billing")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!([catalog_entry("BILLING-1", "1.0.0"), catalog_entry("BILLING-2", "2.0.0")])
                .to_string(),
        )
        .create_async()
        .await;

    let client = client(&server);
    let query = InstanceQuery::new("billing").unwrap().with_preferred_version("2.0.0");
    let instances = assert_ok!(client.find_all(&query).await);

    mock.assert_async().await;
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].instance_id(), "BILLING-2");
    assert_eq!(instances[0].ip(), "10.0.1.5");
    assert_eq!(instances[0].application_port().number, 7000);
}

#[tokio::test]
async fn test_list_all_skips_consul_itself() {
    let mut server = setup_mock_server().await;

    let _services = server
        .mock("GET", "/v1/catalog/services")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"consul": [], "billing": ["primary"]}"#)
        .create_async()
        .await;
    let billing = server
        .mock("GET", "/v1/catalog/service/billing")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(serde_json::json!([catalog_entry("BILLING-1", "1.0.0")]).to_string())
        .create_async()
        .await;
    let consul = server
        .mock("GET", "/v1/catalog/service/consul")
        .expect(0)
        .create_async()
        .await;

    let client = client(&server);
    let instances = assert_ok!(client.list_all().await);

    billing.assert_async().await;
    consul.assert_async().await;
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].service_name(), "billing");
}

#[tokio::test]
async fn test_fanout_fails_when_any_backend_fails() {
    let mut server = setup_mock_server().await;

    let _mock = server
        .mock("GET", "/v1/catalog/service/billing")
        .with_status(500)
        .with_body("rpc error")
        .create_async()
        .await;

    let fixed = FixedClient::new(vec![instance()]);
    let fanout = FanoutClient::new(vec![Backend::from(fixed), Backend::from(client(&server))]).unwrap();
    let query = InstanceQuery::new("billing").unwrap();

    let err = assert_err!(fanout.find_all(&query).await);
    assert!(matches!(err, RegistryError::Remote(_)));
}

#[tokio::test]
async fn test_fanout_find_by_id_stops_at_first_hit() {
    let mut server = setup_mock_server().await;

    let catalog = server
        .mock("GET", "/v1/catalog/service/billing")
        .expect(0)
        .create_async()
        .await;

    let fixed = FixedClient::new(vec![instance()]);
    let fanout = FanoutClient::new(vec![Backend::from(fixed), Backend::from(client(&server))]).unwrap();

    let found = assert_ok!(fanout.find_by_id("billing", "billing-1").await);
    assert_eq!(found.map(|i| i.instance_id().to_string()), Some("BILLING-1".to_string()));
    catalog.assert_async().await;
}
