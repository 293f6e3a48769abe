//! Engine discovery over on-disk fixture layouts.

use rebuilder::io::engine::{self, EngineLocator, EngineSource, NoRegistry};
use rebuilder::test_support::{write_engine_root, write_project};

#[test]
fn source_build_finds_sibling_engine_and_its_version() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_engine_root(temp.path(), 5, 3, 1);
    let project = write_project(&temp.path().join("Shooter"), "Shooter", "");
    let locator = EngineLocator::new(Box::new(NoRegistry), None);

    let resolution = locator.resolve(Some(&project), None);

    assert_eq!(resolution.source, EngineSource::Sibling);
    let root = resolution.root.expect("engine root");
    assert_eq!(root, temp.path());
    let version = engine::read_version(&root).expect("version");
    assert_eq!(version.to_string(), "5.3.1");
}

#[test]
fn explicit_hint_beats_every_other_source() {
    let temp = tempfile::tempdir().expect("tempdir");
    write_engine_root(temp.path(), 5, 3, 1);
    let hinted = temp.path().join("Hinted");
    write_engine_root(&hinted, 5, 5, 0);
    let project = write_project(&temp.path().join("Shooter"), "Shooter", "");
    let locator = EngineLocator::new(Box::new(NoRegistry), Some(temp.path().to_path_buf()));

    // The hint may name the Engine directory instead of the root.
    let resolution = locator.resolve(Some(&project), Some(&hinted.join("Engine")));

    assert_eq!(resolution.source, EngineSource::Hint);
    assert_eq!(resolution.root, Some(hinted));
}
