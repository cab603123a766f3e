//! Cookie jars saved to disk and loaded back, alone and through an agent.

use tempfile::TempDir;
use url::Url;
use webagent_core::{Agent, AgentConfig, CookieFormat, CookieJar, SaveOptions};
use wiremock::matchers::{header, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn populated_jar() -> (CookieJar, Url) {
    let uri = Url::parse("http://www.example.com/account").unwrap();
    let mut jar = CookieJar::new();
    assert!(jar.add_set_cookie(&uri, "persist=1; Max-Age=3600; Path=/"));
    assert!(jar.add_set_cookie(&uri, "scoped=2; Domain=example.com; Max-Age=3600; Path=/"));
    assert!(jar.add_set_cookie(&uri, "session=3; Path=/"));
    (jar, uri)
}

#[test]
fn test_netscape_round_trip_skips_session_cookies() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("cookies.txt");
    let (jar, uri) = populated_jar();

    jar.save(&file, CookieFormat::Netscape, SaveOptions::default())
        .unwrap();
    let written = std::fs::read_to_string(&file).unwrap();
    assert!(written.contains("persist"));
    assert!(!written.contains("session"));

    let mut loaded = CookieJar::new();
    assert_eq!(loaded.load(&file, CookieFormat::Netscape).unwrap(), 2);
    let header = loaded.cookie_header(&uri).unwrap();
    assert!(header.contains("persist=1"));
    assert!(header.contains("scoped=2"));

    // The domain cookie still covers sibling hosts after the round trip.
    let sibling = Url::parse("http://api.example.com/").unwrap();
    assert_eq!(loaded.cookie_header(&sibling).as_deref(), Some("scoped=2"));
}

#[test]
fn test_json_round_trip_with_session_cookies() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("cookies.json");
    let (jar, uri) = populated_jar();

    jar.save(&file, CookieFormat::Json, SaveOptions { session: true })
        .unwrap();

    let mut loaded = CookieJar::new();
    assert_eq!(loaded.load(&file, CookieFormat::Json).unwrap(), 3);
    let session = loaded
        .cookies(&uri)
        .into_iter()
        .find(|c| c.name == "session")
        .unwrap();
    assert!(session.is_session());
    assert_eq!(session.value(), "3");
}

#[test]
fn test_load_missing_file_is_error() {
    let dir = TempDir::new().unwrap();
    let mut jar = CookieJar::new();
    assert!(
        jar.load(&dir.path().join("absent.txt"), CookieFormat::Netscape)
            .is_err()
    );
}

#[tokio::test]
async fn test_agent_sends_loaded_cookies_and_saves_new_ones() {
    let server = MockServer::start().await;
    Mock::given(path("/profile"))
        .and(header("cookie", "token=t1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "seen=yes; Max-Age=600; Path=/")
                .set_body_raw("<html><body>ok</body></html>", "text/html"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let file = dir.path().join("cookies.json");
    let server_uri = Url::parse(&server.uri()).unwrap();

    let mut seed = CookieJar::new();
    assert!(seed.add_set_cookie(&server_uri, "token=t1; Max-Age=600; Path=/"));
    seed.save(&file, CookieFormat::Json, SaveOptions::default())
        .unwrap();

    let mut agent = Agent::new(AgentConfig::default()).unwrap();
    agent.cookie_jar_mut().load(&file, CookieFormat::Json).unwrap();
    agent
        .get(&format!("{}/profile", server.uri()))
        .await
        .unwrap();

    agent
        .cookie_jar()
        .save(&file, CookieFormat::Json, SaveOptions::default())
        .unwrap();
    let mut reloaded = CookieJar::new();
    assert_eq!(reloaded.load(&file, CookieFormat::Json).unwrap(), 2);
}
