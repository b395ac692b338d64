//! End-to-end tests against a real listener.

use std::net::SocketAddr;
use zentinel_contract_stub::{ContractConfig, StubEngine, StubServer};

const CONTRACT: &str = r#"
name: e2e
scenarios:
  - name: root
    request:
      method: GET
      path: /
    response:
      status: 200
      literal:
        type: text
        content: success

  - name: status
    request:
      method: GET
      path: /status
    response:
      status: 200
      literal:
        type: text
        content: healthy

  - name: user-by-id
    request:
      method: GET
      path: /users/{id}
    response:
      status: 200
      literal:
        type: text
        content: by-id

  - name: widget
    request:
      method: GET
      path: /widgets/{id:number}
    response:
      status: 200

  - name: admin
    request:
      method: GET
      path: /users/admin
    response:
      status: 200
      literal:
        type: text
        content: admin

  - name: create-order
    request:
      method: POST
      path: /orders
      body:
        type: object
        properties:
          - name: qty
            type: number
    response:
      status: 201
      body:
        type: object
        properties:
          - name: id
            type: number
            min: 1

  - name: inventory
    request:
      method: POST
      path: /inventory
      query:
        warehouse:
          type: enum
          values: [main, backup]
      body:
        type: xml
        name: query
        children:
          - name: sku
            unbounded: true
            text:
              type: string
    response:
      status: 200
      body:
        type: xml
        name: stock
        children:
          - name: count
            text:
              type: number
              min: 3

  - name: echo
    request:
      method: POST
      path: /echo
      body:
        type: exact
        value: "42"
    response:
      status: 200
      literal:
        type: text
        content: echoed

soap_operations:
  - name: GetQuote
    path: /soap
    soap_action: urn:GetQuote
    request:
      name: GetQuote
    response:
      name: GetQuoteResponse
      children:
        - name: price
          text:
            type: number
"#;

async fn start() -> StubServer {
    let config = ContractConfig::from_yaml(CONTRACT).unwrap();
    let mut server = StubServer::new(StubEngine::from_config(&config).unwrap());
    server
        .start(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    server
}

fn url(server: &StubServer, path: &str) -> String {
    format!("{}{}", server.url().unwrap(), path)
}

#[tokio::test]
async fn root_returns_literal_success() {
    let mut server = start().await;

    let response = reqwest::get(url(&server, "/")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "success");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn invalid_path_parameter_is_diagnosed() {
    let mut server = start().await;

    let response = reqwest::get(url(&server, "/widgets/abc")).await.unwrap();
    assert_eq!(response.status(), 400);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"], "no_matching_scenario");
    assert_eq!(json["candidates"][0]["scenario"], "widget");
    assert_eq!(json["candidates"][0]["mismatches"][0]["path"], "path.id");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn literal_segment_beats_parameter() {
    let mut server = start().await;

    let admin = reqwest::get(url(&server, "/users/admin")).await.unwrap();
    assert_eq!(admin.text().await.unwrap(), "admin");

    let other = reqwest::get(url(&server, "/users/42")).await.unwrap();
    assert_eq!(other.text().await.unwrap(), "by-id");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn mismatch_is_diagnosed() {
    let mut server = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(url(&server, "/orders"))
        .header("content-type", "application/json")
        .body(r#"{"qty":"two"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"], "no_matching_scenario");
    let mismatch = &json["candidates"][0]["mismatches"][0];
    assert_eq!(mismatch["path"], "body.qty");
    assert_eq!(mismatch["reason"], "type_mismatch");

    let response = client
        .post(url(&server, "/orders"))
        .body(r#"{"qty":2}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["id"], 1);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn body_is_parsed_by_content_type() {
    let mut server = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(url(&server, "/echo"))
        .header("content-type", "text/plain")
        .body("42")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "echoed");

    let response = client
        .post(url(&server, "/echo"))
        .header("content-type", "application/json")
        .body("42")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .post(url(&server, "/orders"))
        .header("content-type", "application/json")
        .body(r#"{"qty": 1,"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(json["error"], "malformed_body");
    assert!(json["detail"].as_str().unwrap().starts_with("invalid JSON"));
    assert!(json["candidates"].as_array().unwrap().is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn xml_request_and_generated_xml_response() {
    let mut server = start().await;
    let client = reqwest::Client::new();

    let response = client
        .post(url(&server, "/inventory?warehouse=main"))
        .header("content-type", "text/xml")
        .body("<query>\n  <sku>A-1</sku>\n  <sku>B-2</sku>\n</query>")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/xml");
    assert_eq!(
        response.text().await.unwrap(),
        "<stock><count>3</count></stock>"
    );

    let response = client
        .post(url(&server, "/inventory?warehouse=attic"))
        .body("<query><sku>A-1</sku></query>")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let json: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        json["candidates"][0]["mismatches"][0]["path"],
        "query.warehouse"
    );

    server.stop().await.unwrap();
}

#[tokio::test]
async fn soap_operation_is_served() {
    let mut server = start().await;

    let response = reqwest::Client::new()
        .post(url(&server, "/soap"))
        .header("SOAPAction", "urn:GetQuote")
        .body(
            r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/">
  <soapenv:Body><GetQuote/></soapenv:Body>
</soapenv:Envelope>"#,
        )
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("<GetQuoteResponse><price>0</price></GetQuoteResponse>"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn dynamic_expectation_takes_precedence() {
    let mut server = start().await;
    let client = reqwest::Client::new();

    let before = client.get(url(&server, "/status")).send().await.unwrap();
    assert_eq!(before.text().await.unwrap(), "healthy");

    let expectation = serde_json::json!({
        "name": "maintenance",
        "request": {"method": "GET", "path": "/status"},
        "response": {
            "status": 503,
            "literal": {"type": "text", "content": "maintenance"}
        }
    });
    let created = client
        .post(url(&server, "/_stub/expectations"))
        .json(&expectation)
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);

    let during = client.get(url(&server, "/status")).send().await.unwrap();
    assert_eq!(during.status(), 503);
    assert_eq!(during.text().await.unwrap(), "maintenance");

    let listed: serde_json::Value = client
        .get(url(&server, "/_stub/expectations"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["expectations"][0]["name"], "maintenance");

    let cleared = client
        .delete(url(&server, "/_stub/expectations"))
        .send()
        .await
        .unwrap();
    assert_eq!(cleared.status(), 200);

    let after = client.get(url(&server, "/status")).send().await.unwrap();
    assert_eq!(after.text().await.unwrap(), "healthy");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn invalid_expectation_is_rejected() {
    let mut server = start().await;
    let client = reqwest::Client::new();

    let malformed = client
        .post(url(&server, "/_stub/expectations"))
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 400);

    let invalid = serde_json::json!([{
        "name": "bad",
        "request": {"method": "GET", "path": "/x/{id:uuid}"},
        "response": {"status": 200}
    }]);
    let replaced = client
        .put(url(&server, "/_stub/expectations"))
        .json(&invalid)
        .send()
        .await
        .unwrap();
    assert_eq!(replaced.status(), 400);

    let health: serde_json::Value = client
        .get(url(&server, "/_stub/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["expectations"], 0);
    assert_eq!(health["snapshot_version"], 0);

    server.stop().await.unwrap();
}
