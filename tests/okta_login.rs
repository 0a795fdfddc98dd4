use aws_okta_auth::http_client::{HttpRequest, HttpTransport, Transport};
use aws_okta_auth::interrupt::Interrupt;
use aws_okta_auth::okta::fido::NoAuthenticators;
use aws_okta_auth::okta::Okta;
use aws_okta_auth::secrets::NoSecretStore;
use aws_okta_auth::settings::Settings;
use aws_okta_auth::ui::UI;
use aws_okta_auth::{AuthError, IdentityProvider};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct PasswordOnly;

impl UI for PasswordOnly {
    fn prompt(&self, message: &str) -> aws_okta_auth::Result<String> {
        Err(AuthError::Prompt(format!("unexpected prompt: {}", message)))
    }

    fn prompt_hidden(&self, _message: &str) -> aws_okta_auth::Result<String> {
        Ok("hunter2".to_string())
    }

    fn notify(&self, _message: &str) {}

    fn select(&self, message: &str, _items: &[String]) -> aws_okta_auth::Result<usize> {
        Err(AuthError::Prompt(format!("unexpected selection: {}", message)))
    }

    fn open_url(&self, _url: &str) {}
}

fn saml_page() -> String {
    let xml = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml2="urn:oasis:names:tc:SAML:2.0:assertion">
  <saml2:Assertion>
    <saml2:AttributeStatement>
      <saml2:Attribute Name="https://aws.amazon.com/SAML/Attributes/Role">
        <saml2:AttributeValue>arn:aws:iam::123456789012:saml-provider/okta,arn:aws:iam::123456789012:role/Developer</saml2:AttributeValue>
      </saml2:Attribute>
    </saml2:AttributeStatement>
  </saml2:Assertion>
</samlp:Response>"#;
    format!(
        r#"<html><body>
             <form id="appForm" method="POST" action="https://signin.aws.amazon.com/saml">
               <input name="SAMLResponse" type="hidden" value="{}"/>
               <input name="RelayState" type="hidden" value=""/>
             </form>
           </body></html>"#,
        STANDARD.encode(xml)
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn password_login_to_saml_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/authn"))
        .and(body_partial_json(json!({"username": "alice", "password": "hunter2"})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "SUCCESS", "sessionToken": "session-1"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/sessions"))
        .and(body_partial_json(json!({"sessionToken": "session-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "sid-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/home/amazon_aws/0oa1/272"))
        .and(header("cookie", "sid=sid-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(saml_page()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app_url = format!("{}/home/amazon_aws/0oa1/272", server.uri());
    let saml = tokio::task::spawn_blocking(move || {
        let mut settings = Settings::for_app(&app_url);
        settings.username = Some("alice".to_string());
        let transport = HttpTransport::new()?;
        let okta = Okta::new(
            &settings,
            &PasswordOnly,
            &transport,
            &NoSecretStore,
            &NoAuthenticators,
            Interrupt::new(),
        )?;
        okta.get_saml_assertion()
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(saml.consumer_url, "https://signin.aws.amazon.com/saml");
    let roles = saml.roles().unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].role_arn, "arn:aws:iam::123456789012:role/Developer");
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_credentials_over_http() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/authn"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "errorCode": "E0000004",
            "errorSummary": "Authentication failed"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app_url = format!("{}/home/amazon_aws/0oa1/272", server.uri());
    let result = tokio::task::spawn_blocking(move || {
        let mut settings = Settings::for_app(&app_url);
        settings.username = Some("alice".to_string());
        let transport = HttpTransport::new()?;
        Okta::new(
            &settings,
            &PasswordOnly,
            &transport,
            &NoSecretStore,
            &NoAuthenticators,
            Interrupt::new(),
        )?
        .get_saml_assertion()
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
}

#[tokio::test(flavor = "multi_thread")]
async fn transport_follows_redirects_with_cookies() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", "/landing")
                .insert_header("set-cookie", "DT=device-1; Path=/"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/landing"))
        .and(header("cookie", "DT=device-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
        .expect(1)
        .mount(&server)
        .await;

    let start = format!("{}/start", server.uri());
    let response = tokio::task::spawn_blocking(move || {
        HttpTransport::new()?.request(HttpRequest::get(start))
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body, "landed");
    assert!(response.url.ends_with("/landing"));
}
