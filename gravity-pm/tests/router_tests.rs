mod common;

use common::{doc_of, file_names, names, Fixture};
use gravity_core::{ProcessManagerKind, ServiceType, StateDocument, StateStore};
use gravity_pm::{Operation, PmError, Router, UpdateOptions};
use gravity_renderer::MANAGED_MARKER;

fn router(fx: &Fixture, doc: &StateDocument) -> Router {
    let store = StateStore::at(fx.settings.state_path());
    store.save(doc).unwrap();
    Router::new(&fx.settings, store, fx.control()).unwrap()
}

fn mixed(fx: &Fixture) -> StateDocument {
    doc_of(vec![
        fx.config("a.yml", "a", ProcessManagerKind::Systemd, &[ServiceType::Gunicorn]),
        fx.config("b.yml", "b", ProcessManagerKind::Supervisor, &[ServiceType::Gunicorn]),
    ])
}

#[test]
fn lifecycle_op_without_registrations_is_a_usage_error() {
    let fx = Fixture::new();
    let router = router(&fx, &StateDocument::default());

    let err = router.dispatch(Operation::Start, &[]).unwrap_err();

    assert!(matches!(err, PmError::NoInstancesRegistered));
    assert!(err.to_string().contains("galaxyctl register"));
}

#[test]
fn operations_go_to_the_owning_backend() {
    let fx = Fixture::new();
    let router = router(&fx, &mixed(&fx));

    let dispatch = router.dispatch(Operation::Restart, &[]).unwrap();

    assert_eq!(dispatch.groups[&ProcessManagerKind::Systemd], names(&["a"]));
    assert_eq!(dispatch.groups[&ProcessManagerKind::Supervisor], names(&["b"]));
    // supervisord is down, so its restart launches the daemon.
    let conf = fx.settings.supervisor_dir().join("supervisord.conf");
    assert_eq!(
        fx.control.lines(),
        vec![
            "systemctl restart galaxy-a-gunicorn.service".to_string(),
            format!("supervisord -c {}", conf.display()),
        ]
    );
}

#[test]
fn unknown_names_are_returned_and_skipped() {
    let fx = Fixture::new();
    let router = router(&fx, &mixed(&fx));

    let dispatch = router.dispatch(Operation::Stop, &names(&["a", "nope"])).unwrap();

    assert_eq!(dispatch.unknown, names(&["nope"]));
    assert!(!dispatch.groups.contains_key(&ProcessManagerKind::Supervisor));
    assert_eq!(fx.control.lines(), vec!["systemctl stop galaxy-a-gunicorn.service"]);
}

#[test]
fn status_collects_output_per_backend() {
    let fx = Fixture::new();
    let router = router(&fx, &mixed(&fx));

    let dispatch = router.dispatch(Operation::Status, &[]).unwrap();

    assert_eq!(
        dispatch.output,
        vec![
            (ProcessManagerKind::Systemd, "systemctl ok\n".to_string()),
            (
                ProcessManagerKind::Supervisor,
                "supervisord is not running\n".to_string()
            ),
        ]
    );
}

#[test]
fn update_is_offered_to_every_backend() {
    let fx = Fixture::new();
    let router = router(&fx, &mixed(&fx));

    let dispatch = router.update(&names(&["a"]), UpdateOptions::default()).unwrap();

    let kinds: Vec<ProcessManagerKind> = dispatch.reports.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![ProcessManagerKind::Systemd, ProcessManagerKind::Supervisor]
    );
    assert_eq!(file_names(&fx.unit_dir()), vec!["galaxy-a-gunicorn.service"]);
}

#[test]
fn update_with_nothing_registered_clears_leftovers() {
    let fx = Fixture::new();
    std::fs::create_dir_all(fx.unit_dir()).unwrap();
    std::fs::write(
        fx.unit_dir().join("galaxy-old-gunicorn.service"),
        format!("# {MANAGED_MARKER}\n"),
    )
    .unwrap();
    let router = router(&fx, &StateDocument::default());

    let dispatch = router.update(&[], UpdateOptions::default()).unwrap();

    assert!(dispatch.unknown.is_empty());
    assert!(file_names(&fx.unit_dir()).is_empty());
    assert_eq!(
        fx.control.lines(),
        vec![
            "systemctl stop galaxy-old-gunicorn.service",
            "systemctl daemon-reload"
        ]
    );
}

#[test]
fn update_of_only_unknown_names_does_nothing() {
    let fx = Fixture::new();
    let router = router(&fx, &mixed(&fx));

    let dispatch = router.update(&names(&["zz"]), UpdateOptions::default()).unwrap();

    assert_eq!(dispatch.unknown, names(&["zz"]));
    assert!(dispatch.reports.is_empty());
    assert!(file_names(&fx.unit_dir()).is_empty());
}
