use issue_mirror::services::github_client::{
    CreateIssuePayload, GitHubClient, RemoteIssueSource, UpdateIssuePayload,
};
use issue_mirror::AppError;
use serde_json::json;
use wiremock::matchers::{
    body_json, header, header_regex, method, path, query_param, query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn issue_json(id: i64, number: i64, title: &str) -> serde_json::Value {
    json!({
        "id": id,
        "number": number,
        "title": title,
        "body": "details",
        "state": "open",
        "labels": [{"id": 1, "name": "bug", "color": "d73a4a"}],
        "assignees": [{"login": "octocat", "id": 583231}],
        "created_at": "2026-03-01T10:00:00Z",
        "updated_at": "2026-03-02T10:00:00Z",
        "closed_at": null,
        "html_url": format!("https://github.com/octo/hello/issues/{}", number)
    })
}

#[tokio::test]
async fn list_issues_sends_api_headers() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/issues"))
        .and(query_param("state", "all"))
        .and(query_param("per_page", "100"))
        .and(header("authorization", "Bearer ghp_test"))
        .and(header("accept", "application/vnd.github+json"))
        .and(header("x-github-api-version", "2022-11-28"))
        .and(header_regex("user-agent", "^issue-mirror/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([issue_json(1, 1, "First")])))
        .expect(1)
        .mount(&server)
        .await;

    let client = GitHubClient::with_base_url(&server.uri()).unwrap();
    let issues = client.list_issues("octo", "hello", "ghp_test").await.unwrap();

    assert_eq!(issues.len(), 1);
    let fields = issues[0].to_fields();
    assert_eq!(fields.github_id, Some(1));
    assert_eq!(fields.labels, vec!["bug"]);
    assert_eq!(fields.assignees, vec!["octocat"]);
    assert_eq!(fields.body, "details");
}

#[tokio::test]
async fn list_issues_follows_link_pagination_and_skips_pull_requests() {
    let server = MockServer::start().await;
    let next = format!(
        "<{}/repos/octo/hello/issues?state=all&per_page=100&page=2>; rel=\"next\", <{}/repos/octo/hello/issues?state=all&per_page=100&page=2>; rel=\"last\"",
        server.uri(),
        server.uri()
    );

    let mut pull = issue_json(3, 3, "A pull request");
    pull["pull_request"] = json!({"url": "https://api.github.com/repos/octo/hello/pulls/3"});

    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/issues"))
        .and(query_param_is_missing("page"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("link", next.as_str())
                .set_body_json(json!([issue_json(1, 1, "First"), pull])),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/issues"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([issue_json(2, 2, "Second")])))
        .expect(1)
        .mount(&server)
        .await;

    let client = GitHubClient::with_base_url(&server.uri()).unwrap();
    let issues = client.list_issues("octo", "hello", "ghp_test").await.unwrap();

    let titles: Vec<&str> = issues.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, vec!["First", "Second"]);
}

#[tokio::test]
async fn create_issue_posts_payload() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/repos/octo/hello/issues"))
        .and(body_json(json!({
            "title": "New bug",
            "body": "Steps to reproduce",
            "labels": ["bug"]
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 9001,
            "number": 42,
            "title": "New bug",
            "state": "open",
            "html_url": "https://github.com/octo/hello/issues/42"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GitHubClient::with_base_url(&server.uri()).unwrap();
    let payload = CreateIssuePayload {
        title: "New bug".to_string(),
        body: Some("Steps to reproduce".to_string()),
        labels: Some(vec!["bug".to_string()]),
        ..Default::default()
    };
    let created = client
        .create_issue("octo", "hello", "ghp_test", &payload)
        .await
        .unwrap();

    assert_eq!(created.id, 9001);
    assert_eq!(created.number, 42);
}

#[tokio::test]
async fn update_issue_patches_by_number() {
    let server = MockServer::start().await;

    Mock::given(method("PATCH"))
        .and(path("/repos/octo/hello/issues/7"))
        .and(body_json(json!({
            "title": "Renamed",
            "body": "",
            "state": "closed",
            "labels": [],
            "assignees": ["octocat"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 700,
            "number": 7,
            "title": "Renamed",
            "state": "closed",
            "html_url": "https://github.com/octo/hello/issues/7"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GitHubClient::with_base_url(&server.uri()).unwrap();
    let payload = UpdateIssuePayload {
        title: "Renamed".to_string(),
        body: String::new(),
        state: "closed".to_string(),
        labels: Vec::new(),
        assignees: vec!["octocat".to_string()],
    };
    let updated = client
        .update_issue("octo", "hello", "ghp_test", 7, &payload)
        .await
        .unwrap();

    assert_eq!(updated.state, "closed");
}

#[tokio::test]
async fn empty_token_fails_without_a_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": "x"})))
        .expect(0)
        .mount(&server)
        .await;

    let client = GitHubClient::with_base_url(&server.uri()).unwrap();
    let err = client.validate_token("").await.unwrap_err();

    let credential = err.as_credential().unwrap();
    assert_eq!(credential.status_code, 401);
    assert!(err.to_string().contains("No GitHub token provided"));
}

#[tokio::test]
async fn rejected_token_maps_to_credential_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .and(header("authorization", "Bearer badtoken"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "message": "Bad credentials",
            "documentation_url": "https://docs.github.com/rest"
        })))
        .mount(&server)
        .await;

    let client = GitHubClient::with_base_url(&server.uri()).unwrap();
    let err = client.validate_token("badtoken").await.unwrap_err();

    assert!(err.is_credential());
    assert_eq!(err.as_credential().unwrap().status_code, 401);
    assert!(err.to_string().contains("Invalid or expired"));
}

#[tokio::test]
async fn forbidden_token_check_names_no_repository() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "message": "Resource protected by organization SAML enforcement"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GitHubClient::with_base_url(&server.uri()).unwrap();
    let err = client.validate_token("ghp_test").await.unwrap_err();

    let credential = err.as_credential().unwrap();
    assert_eq!(credential.status_code, 403);
    assert!(credential.message.contains("GitHub API"));
    assert!(!credential.message.contains('/'));
}

#[tokio::test]
async fn repository_access_maps_forbidden_and_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/octo/private"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octo/hello"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"full_name": "octo/hello"})))
        .mount(&server)
        .await;

    let client = GitHubClient::with_base_url(&server.uri()).unwrap();

    let err = client
        .validate_repository_access("octo", "private", "ghp_test")
        .await
        .unwrap_err();
    assert_eq!(err.as_credential().unwrap().status_code, 403);

    let err = client
        .validate_repository_access("octo", "missing", "ghp_test")
        .await
        .unwrap_err();
    assert_eq!(err.as_credential().unwrap().status_code, 404);
    assert!(err.to_string().contains("octo/missing"));

    client
        .validate_repository_access("octo", "hello", "ghp_test")
        .await
        .unwrap();
}

#[tokio::test]
async fn server_error_on_list_is_retryable_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/issues"))
        .respond_with(ResponseTemplate::new(502).set_body_json(json!({"message": "Server Error"})))
        .mount(&server)
        .await;

    let client = GitHubClient::with_base_url(&server.uri()).unwrap();
    let err = client
        .list_issues("octo", "hello", "ghp_test")
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(!err.is_credential());
    match err {
        AppError::GitHubApi {
            message,
            status_code,
            ..
        } => {
            assert_eq!(message, "Server Error");
            assert_eq!(status_code, Some(502));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn malformed_success_body_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/repos/octo/hello/issues"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let client = GitHubClient::with_base_url(&server.uri()).unwrap();
    let err = client
        .list_issues("octo", "hello", "ghp_test")
        .await
        .unwrap_err();

    match err {
        AppError::Decode { endpoint, .. } => {
            assert_eq!(endpoint.as_deref(), Some("/repos/octo/hello/issues"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_host_is_transport_error() {
    // Nothing listens on port 9 locally
    let client = GitHubClient::with_base_url("http://127.0.0.1:9").unwrap();
    let err = client
        .list_issues("octo", "hello", "ghp_test")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Transport { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn control_characters_in_repo_are_rejected() {
    let client = GitHubClient::with_base_url("http://127.0.0.1:9").unwrap();
    let err = client
        .list_issues("octo", "hel\nlo", "ghp_test")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Request { .. }));
}
