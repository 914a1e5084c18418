use std::fs;
use std::path::Path;

use tempfile::TempDir;
use whiskey::config::DeploymentConfig;
use whiskey::phase::ShellPhaseRunner;
use whiskey::release::{switch_current, ReleaseRotation, CURRENT_LINK};

fn config(base: &Path, build: &str) -> DeploymentConfig {
    let yaml = format!(
        "deploy_base: {}\nshell: /bin/sh\ncopy:\n  - mkdir -p $DEPLOY_DIR\nbuild:\n  - {}\n",
        base.display(),
        build
    );
    DeploymentConfig::parse(&yaml, "deploy.yml").unwrap()
}

#[test]
fn executor_switches_current_to_built_release() {
    let work = TempDir::new().unwrap();
    let base = TempDir::new().unwrap();
    let config = config(base.path(), "touch $DEPLOY_DIR/ok");
    let runner = ShellPhaseRunner::new(config.shell.clone(), work.path());

    let report = ReleaseRotation::new(&config, &runner, work.path())
        .run()
        .unwrap();

    assert!(base.path().join(CURRENT_LINK).join("ok").is_file());
    assert_eq!(
        fs::read_link(base.path().join(CURRENT_LINK)).unwrap(),
        Path::new(&report.release_id)
    );
}

#[test]
fn failed_build_keeps_previous_release_live() {
    let work = TempDir::new().unwrap();
    let base = TempDir::new().unwrap();
    fs::create_dir(base.path().join("1600000000")).unwrap();
    switch_current(base.path(), "1600000000").unwrap();

    let config = config(base.path(), "\"false\"");
    let runner = ShellPhaseRunner::new(config.shell.clone(), work.path());

    let err = ReleaseRotation::new(&config, &runner, work.path())
        .with_release_id("1700000000")
        .run()
        .unwrap_err();

    assert_eq!(err.code.as_str(), "phase.command_failed");
    assert_eq!(
        fs::read_link(base.path().join(CURRENT_LINK)).unwrap(),
        Path::new("1600000000")
    );
}

#[test]
fn overlay_lands_in_new_release_before_postinst() {
    let work = TempDir::new().unwrap();
    let base = TempDir::new().unwrap();
    fs::create_dir(base.path().join(".config")).unwrap();
    fs::write(base.path().join(".config/.env"), "DATABASE_URL=postgres://db\n").unwrap();

    let yaml = format!(
        concat!(
            "deploy_base: {}\nshell: /bin/sh\ncopy:\n  - mkdir -p $DEPLOY_DIR\n",
            "postinst:\n  - grep -q DATABASE_URL $DEPLOY_DIR/.env\n"
        ),
        base.path().display()
    );
    let config = DeploymentConfig::parse(&yaml, "deploy.yml").unwrap();
    let runner = ShellPhaseRunner::new(config.shell.clone(), work.path());

    let report = ReleaseRotation::new(&config, &runner, work.path())
        .run()
        .unwrap();

    assert_eq!(report.overlaid, vec![".env".to_string()]);
}
