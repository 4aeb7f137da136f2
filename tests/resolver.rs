mod common;

use common::{CannedQueryService, GOOD_ANSWER, LOGIN_PAGE, ScriptedSurface};
use login_pilot::brain::QueryContext;
use login_pilot::{LoginError, PageCache, ResolveSource, SelectorResolver};
use std::sync::Arc;

#[tokio::test]
async fn resolves_against_a_snapshot_and_remembers_its_fingerprint() {
    let dir = tempfile::tempdir().unwrap();
    let surface = ScriptedSurface::new().page("https://example.com/login", &[LOGIN_PAGE]);
    let mut cache = PageCache::new(dir.path());
    cache.initialize().unwrap();
    let snapshot = cache
        .capture(&surface, "https://example.com/login")
        .await
        .unwrap();

    let service = Arc::new(CannedQueryService::answering(GOOD_ANSWER));
    let resolver = SelectorResolver::new(service.clone());
    let selectors = resolver
        .resolve(ResolveSource::Snapshot(&snapshot))
        .await
        .unwrap();

    assert_eq!(selectors.username_field, "#email");
    assert_eq!(selectors.password_field, "#pwd");
    assert_eq!(selectors.submit_control, "#submit");
    assert_eq!(selectors.source_fingerprint, Some(snapshot.fingerprint.clone()));

    let requests = service.requests();
    assert_eq!(requests[0].instruction, SelectorResolver::instruction());
    assert!(matches!(
        &requests[0].context,
        QueryContext::Document { text, .. } if *text == snapshot.markup
    ));
}

#[tokio::test]
async fn every_incomplete_answer_is_a_resolution_error() {
    let answers = [
        r##"{"passwordField": "#p", "submitControl": "#s"}"##,
        r##"{"usernameField": "#u", "submitControl": "#s"}"##,
        r##"{"usernameField": "#u", "passwordField": "#p"}"##,
        "{}",
        "",
        "I could not find a login form on this page.",
    ];
    for answer in answers {
        let resolver = SelectorResolver::new(Arc::new(CannedQueryService::answering(answer)));
        let err = resolver
            .resolve(ResolveSource::CacheDir(std::env::temp_dir()))
            .await
            .unwrap_err();
        assert!(
            matches!(err, LoginError::Resolution(_)),
            "answer {answer:?} gave {err:?}"
        );
    }
}
