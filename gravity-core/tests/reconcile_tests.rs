//! Reconcile + commit cycles against an in-memory parser.

mod common;

use std::collections::BTreeSet;
use std::path::PathBuf;

use common::{parsed, FakeParser};
use gravity_core::{
    commit_changes, deregister, determine_changes, is_noop, register, ConfigType, InstanceName,
    ProcessManagerKind, RegisterOutcome, ServiceSpec, ServiceType, Settings, StateStore,
};
use tempfile::TempDir;

struct Fixture {
    home: TempDir,
    settings: Settings,
    store: StateStore,
    parser: FakeParser,
}

fn fixture() -> Fixture {
    let home = TempDir::new().expect("tempdir");
    let settings = Settings::at(home.path().join("state"));
    let store = StateStore::open(&settings).expect("open store");
    Fixture {
        home,
        settings,
        store,
        parser: FakeParser::default(),
    }
}

impl Fixture {
    fn config_path(&self, name: &str) -> PathBuf {
        self.home.path().join(name)
    }

    fn register(&self, path: &PathBuf) {
        let outcomes = register(
            &self.store,
            &self.parser,
            &self.settings,
            std::slice::from_ref(path),
            None,
        )
        .expect("register");
        assert!(matches!(outcomes[0], RegisterOutcome::Registered { .. }));
    }

    fn cycle(&self) {
        let (changes, summary) = determine_changes(&self.store, &self.parser).expect("determine");
        commit_changes(&self.store, &changes, &summary).expect("commit");
    }
}

fn names(list: &[&str]) -> BTreeSet<InstanceName> {
    list.iter().map(|n| InstanceName::from(*n)).collect()
}

#[test]
fn new_registration_stages_its_services_then_reregistering_is_a_noop() {
    let fx = fixture();
    let a = fx.config_path("a.yml");
    fx.parser.set(&a, parsed(Some("x"), &[ServiceType::Gunicorn]));
    fx.register(&a);

    let (changes, summary) = determine_changes(&fx.store, &fx.parser).expect("determine");
    let change = &changes[&a];
    assert_eq!(
        change.update_services,
        vec![ServiceSpec::new(ConfigType::Galaxy, ServiceType::Gunicorn)]
    );
    assert!(change.remove_services.is_empty());
    assert_eq!(summary.changed_instances, names(&["x"]));
    assert!(summary.remove_instances.is_empty());

    commit_changes(&fx.store, &changes, &summary).expect("commit");
    let stored = fx.store.get(&a).expect("get").expect("registered");
    assert_eq!(stored.services.len(), 1);

    let before = std::fs::read_to_string(fx.store.path()).expect("read state");
    let outcomes = register(&fx.store, &fx.parser, &fx.settings, &[a.clone()], None)
        .expect("register again");
    assert!(matches!(outcomes[0], RegisterOutcome::AlreadyRegistered { .. }));
    let after = std::fs::read_to_string(fx.store.path()).expect("read state");
    assert_eq!(before, after, "duplicate registration must not touch the store");
}

#[test]
fn second_cycle_without_config_changes_is_empty() {
    let fx = fixture();
    let a = fx.config_path("a.yml");
    fx.parser.set(
        &a,
        parsed(
            Some("x"),
            &[ServiceType::Gunicorn, ServiceType::Celery, ServiceType::CeleryBeat],
        ),
    );
    fx.register(&a);
    fx.cycle();

    let (changes, summary) = determine_changes(&fx.store, &fx.parser).expect("determine");
    assert!(is_noop(&changes, &summary), "got {changes:?} / {summary:?}");
}

#[test]
fn instance_rename_is_staged_and_old_name_scheduled_for_removal() {
    let fx = fixture();
    let a = fx.config_path("a.yml");
    fx.parser.set(&a, parsed(Some("x"), &[ServiceType::Gunicorn]));
    fx.register(&a);
    fx.cycle();

    fx.parser
        .edit(&a, |p| p.instance_name = Some(InstanceName::from("y")));
    let (changes, summary) = determine_changes(&fx.store, &fx.parser).expect("determine");
    assert_eq!(
        changes[&a].update_instance_name,
        Some(InstanceName::from("y"))
    );
    assert_eq!(summary.changed_instances, names(&["y"]));
    assert_eq!(summary.remove_instances, vec![InstanceName::from("x")]);

    commit_changes(&fx.store, &changes, &summary).expect("commit");
    let stored = fx.store.get(&a).expect("get").expect("registered");
    assert_eq!(stored.instance_name, InstanceName::from("y"));
}

#[test]
fn generated_instance_name_is_kept_when_config_names_none() {
    let fx = fixture();
    let a = fx.config_path("a.yml");
    fx.parser.set(&a, parsed(None, &[ServiceType::Gunicorn]));
    fx.register(&a);
    let generated = fx.store.get(&a).expect("get").expect("registered").instance_name;
    assert!(generated.as_str().starts_with("galaxy-"));

    fx.cycle();
    let (changes, summary) = determine_changes(&fx.store, &fx.parser).expect("determine");
    assert!(changes[&a].update_instance_name.is_none());
    assert!(summary.remove_instances.is_empty());
    assert_eq!(
        fx.store.get(&a).expect("get").expect("registered").instance_name,
        generated
    );
}

#[test]
fn unreadable_config_keeps_registration_and_instance() {
    let fx = fixture();
    let a = fx.config_path("a.yml");
    fx.parser.set(&a, parsed(Some("x"), &[ServiceType::Gunicorn]));
    fx.register(&a);
    fx.cycle();
    let before = fx.store.load().expect("load");

    fx.parser.remove(&a);
    let (changes, summary) = determine_changes(&fx.store, &fx.parser).expect("determine");
    assert!(!changes.contains_key(&a));
    assert_eq!(summary.unreadable_configs, vec![a.clone()]);
    assert!(summary.remove_instances.is_empty());

    commit_changes(&fx.store, &changes, &summary).expect("commit");
    assert_eq!(fx.store.load().expect("load"), before);
}

#[test]
fn one_broken_config_does_not_block_the_others() {
    let fx = fixture();
    let a = fx.config_path("a.yml");
    let b = fx.config_path("b.yml");
    fx.parser.set(&a, parsed(Some("x"), &[ServiceType::Gunicorn]));
    fx.parser.set(&b, parsed(Some("y"), &[ServiceType::Gunicorn]));
    fx.register(&a);
    fx.register(&b);

    fx.parser.remove(&a);
    let (changes, summary) = determine_changes(&fx.store, &fx.parser).expect("determine");
    assert_eq!(summary.changed_instances, names(&["y"]));
    assert_eq!(changes[&b].update_services.len(), 1);
}

#[test]
fn service_diff_and_commit_produce_canonical_list() {
    let fx = fixture();
    let a = fx.config_path("a.yml");
    fx.parser.set(
        &a,
        parsed(
            Some("x"),
            &[ServiceType::Gunicorn, ServiceType::Celery, ServiceType::CeleryBeat],
        ),
    );
    fx.register(&a);
    fx.cycle();

    let gunicorn = ServiceSpec::new(ConfigType::Galaxy, ServiceType::Gunicorn);
    let celery = ServiceSpec::new(ConfigType::Galaxy, ServiceType::Celery);
    let beat = ServiceSpec::new(ConfigType::Galaxy, ServiceType::CeleryBeat);
    let mut celery_tuned = celery.clone();
    celery_tuned.umask = Some("027".to_string());
    let handler = ServiceSpec::named(ConfigType::Galaxy, ServiceType::Standalone, "handler0")
        .with_server_pool("job-handlers");

    fx.parser.edit(&a, |p| {
        p.services = vec![gunicorn.clone(), celery_tuned.clone(), handler.clone()];
    });
    let (changes, summary) = determine_changes(&fx.store, &fx.parser).expect("determine");
    let change = &changes[&a];
    assert_eq!(change.update_services, vec![celery_tuned.clone(), handler.clone()]);
    assert_eq!(change.remove_services, vec![celery, beat]);

    commit_changes(&fx.store, &changes, &summary).expect("commit");
    let services = fx.store.get(&a).expect("get").expect("registered").services;
    assert_eq!(services.len(), 3);
    for expected in [&gunicorn, &celery_tuned, &handler] {
        assert_eq!(services.iter().filter(|s| s == &expected).count(), 1);
    }
}

#[test]
fn service_order_is_not_a_change() {
    let fx = fixture();
    let a = fx.config_path("a.yml");
    fx.parser
        .set(&a, parsed(Some("x"), &[ServiceType::Gunicorn, ServiceType::Celery]));
    fx.register(&a);
    fx.cycle();

    fx.parser.edit(&a, |p| p.services.reverse());
    let (changes, summary) = determine_changes(&fx.store, &fx.parser).expect("determine");
    assert!(is_noop(&changes, &summary));
}

#[test]
fn attribute_and_process_manager_changes_mark_instance_changed() {
    let fx = fixture();
    let a = fx.config_path("a.yml");
    fx.parser.set(&a, parsed(Some("x"), &[ServiceType::Gunicorn]));
    fx.register(&a);
    fx.cycle();

    fx.parser.edit(&a, |p| {
        p.attribs.bind_port = 9090;
        p.process_manager = Some(ProcessManagerKind::Supervisor);
    });
    let (changes, summary) = determine_changes(&fx.store, &fx.parser).expect("determine");
    let change = &changes[&a];
    assert_eq!(change.update_attribs.as_ref().map(|a| a.bind_port), Some(9090));
    assert_eq!(
        change.update_process_manager,
        Some(ProcessManagerKind::Supervisor)
    );
    assert_eq!(summary.changed_instances, names(&["x"]));

    commit_changes(&fx.store, &changes, &summary).expect("commit");
    let stored = fx.store.get(&a).expect("get").expect("registered");
    assert_eq!(stored.attribs.bind_port, 9090);
    assert_eq!(stored.process_manager, ProcessManagerKind::Supervisor);
}

#[test]
fn deregistered_config_is_purged_and_its_instance_removed() {
    let fx = fixture();
    let a = fx.config_path("a.yml");
    fx.parser.set(&a, parsed(Some("x"), &[ServiceType::Gunicorn]));
    fx.register(&a);
    fx.cycle();

    let removed = deregister(&fx.store, &[a.display().to_string()]).expect("deregister");
    assert_eq!(removed, vec![a.clone()]);
    let doc = fx.store.load().expect("load");
    assert!(!doc.config_files.contains_key(&a));
    assert_eq!(doc.remove_configs[&a].instance_name, InstanceName::from("x"));

    let (changes, summary) = determine_changes(&fx.store, &fx.parser).expect("determine");
    assert!(summary.remove_configs.contains_key(&a));
    assert_eq!(summary.remove_instances, vec![InstanceName::from("x")]);

    commit_changes(&fx.store, &changes, &summary).expect("commit");
    let doc = fx.store.load().expect("load");
    assert!(doc.remove_configs.is_empty());
    assert!(doc.config_files.is_empty());
}

#[test]
fn shared_instance_survives_while_any_config_references_it() {
    let fx = fixture();
    let a = fx.config_path("a.yml");
    let b = fx.config_path("b.yml");
    fx.parser.set(&a, parsed(Some("x"), &[ServiceType::Gunicorn]));
    fx.parser.set(&b, parsed(Some("x"), &[ServiceType::Celery]));
    fx.register(&a);
    fx.register(&b);
    fx.cycle();

    deregister(&fx.store, &[a.display().to_string()]).expect("deregister");
    let (_, summary) = determine_changes(&fx.store, &fx.parser).expect("determine");
    assert!(summary.remove_instances.is_empty());
}

#[test]
fn deregister_by_instance_name_removes_all_of_its_configs() {
    let fx = fixture();
    let a = fx.config_path("a.yml");
    let b = fx.config_path("b.yml");
    let c = fx.config_path("c.yml");
    fx.parser.set(&a, parsed(Some("x"), &[ServiceType::Gunicorn]));
    fx.parser.set(&b, parsed(Some("x"), &[ServiceType::Celery]));
    fx.parser.set(&c, parsed(Some("z"), &[ServiceType::Gunicorn]));
    for path in [&a, &b, &c] {
        fx.register(path);
    }

    let mut removed = deregister(&fx.store, &["x".to_string()]).expect("deregister");
    removed.sort();
    assert_eq!(removed, vec![a, b]);
    assert!(fx.store.is_registered(&c).expect("is_registered"));
}
