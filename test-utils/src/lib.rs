//! `test-utils` is used for testing `callgate-lib`.
//! This crate does not depend on `callgate-lib`, so that it can be used from
//! both unit tests and integration tests without a dependency cycle.
//! Macros are used instead, so that the importer is responsible for providing the dependencies.

/// Create a mock web server, which responds with a predefined status to
/// every request, regardless of method or path
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::any()).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Mount a route on an existing mock server which must be hit exactly
/// `$expect` times before the server is dropped.
///
/// The expectation is verified when the `MockServer` goes out of scope,
/// which makes it the main tool for asserting how many network calls a
/// coordinator actually issued.
#[macro_export]
macro_rules! mount_expecting {
    ($server:expr, $method:expr, $path:expr, $template:expr, $expect:expr $(,)?) => {{
        wiremock::Mock::given(wiremock::matchers::method($method))
            .and(wiremock::matchers::path($path))
            .respond_with($template)
            .expect($expect)
            .mount(&$server)
            .await;
    }};
}

/// Build a `ResponseTemplate` returning the given JSON body with a 200 status,
/// optionally delayed by the given duration
#[macro_export]
macro_rules! json_template {
    ($body:expr $(,)?) => {
        wiremock::ResponseTemplate::new(http::StatusCode::OK).set_body_json($body)
    };
    ($body:expr, $delay:expr $(,)?) => {
        wiremock::ResponseTemplate::new(http::StatusCode::OK)
            .set_body_json($body)
            .set_delay($delay)
    };
}

/// Join a path onto the base URI of a mock server, yielding a `url::Url`
///
/// # Panic
///
/// This panics on error, so it should only be used for testing
#[macro_export]
macro_rules! mock_url {
    ($server:expr, $path:expr $(,)?) => {{
        url::Url::parse(&format!("{}{}", $server.uri(), $path)).expect("Expected valid mock URL")
    }};
}

/// Poll a condition until it holds, panicking after five seconds.
///
/// Coordinator state changes happen on spawned tasks, so tests use this to
/// wait for a queue or registry to reach an expected shape.
#[macro_export]
macro_rules! wait_until {
    ($cond:expr $(,)?) => {{
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !($cond) {
            assert!(
                std::time::Instant::now() < deadline,
                "condition `{}` not reached in time",
                stringify!($cond)
            );
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }};
}
