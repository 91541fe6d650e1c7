//! Bundle round-trips and structural rejection.

use std::io::{Cursor, Write};

use serde_json::json;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use webtoon_harvest::archive::MAX_ENTRY_BYTES;
use webtoon_harvest::{
    Archiver, HarvestError, JsonFileStore, ProjectState, ProjectStore, SessionManager,
};

struct Workspace {
    _dir: tempfile::TempDir,
    store: JsonFileStore,
    sessions: SessionManager,
    archiver: Archiver,
}

fn workspace() -> Workspace {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::new(dir.path().join("data/project_data.json"));
    let sessions = SessionManager::new(dir.path().join("static/uploads"), "webtoon");
    let archiver = Archiver::new(sessions.clone(), "/static/uploads");
    Workspace {
        _dir: dir,
        store,
        sessions,
        archiver,
    }
}

fn zip_of(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn sample_state() -> ProjectState {
    ProjectState::from_value(json!({
        "blocks": [{"type": "B", "text": "안녕"}, {"type": "C", "text": "caption"}],
        "blockTypes": ["HB", "B", "DB", "C", "HC"],
        "apiKeys": {"gemini": "secret"},
        "glossary": [{"term": "sunbae", "meaning": "senior"}],
        "lastOpened": "ep-12"
    }))
    .unwrap()
}

#[test]
fn test_round_trip_restores_state_and_images() {
    let source = workspace();
    source.store.save(&sample_state()).unwrap();
    let session = source.sessions.create_session().unwrap();
    std::fs::write(session.folder_path.join("image_001.jpg"), b"page one").unwrap();
    std::fs::write(session.folder_path.join("image_002.jpg"), b"page two").unwrap();
    std::fs::write(session.folder_path.join("image_003.jpg"), b"page three").unwrap();
    std::fs::write(session.folder_path.join("image_004.jpg"), b"page two").unwrap();

    let bundle = source.archiver.pack_current(&source.store).unwrap();

    let target = workspace();
    let report = target.archiver.unpack(&bundle, &target.store).unwrap();

    assert_eq!(report.project_state, sample_state());
    assert_eq!(target.store.load().unwrap(), sample_state());
    assert!(report.failures.is_empty());
    assert_eq!(report.assets.len(), 3);

    let restored = report.session.unwrap();
    let mut names: Vec<&str> = report.assets.iter().map(|a| a.filename.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["image_001.jpg", "image_002.jpg", "image_003.jpg"]);
    assert_eq!(
        std::fs::read(restored.folder_path.join("image_002.jpg")).unwrap(),
        b"page two"
    );
    let asset = report
        .assets
        .iter()
        .find(|a| a.filename == "image_003.jpg")
        .unwrap();
    assert_eq!(
        asset.public_ref,
        format!("/static/uploads/{}/image_003.jpg", restored.folder_name())
    );
    assert_eq!(
        target.sessions.latest_session().unwrap().unwrap().id,
        restored.id
    );
}

#[test]
fn test_state_only_bundle_restores_without_session() {
    let source = workspace();
    source.store.save(&sample_state()).unwrap();
    let bundle = source.archiver.pack_current(&source.store).unwrap();

    let target = workspace();
    let report = target.archiver.unpack(&bundle, &target.store).unwrap();
    assert!(report.session.is_none());
    assert!(report.assets.is_empty());
    assert_eq!(target.sessions.counts().unwrap().folders, 0);
}

#[test]
fn test_html_error_page_rejected_without_state_change() {
    let ws = workspace();
    ws.store.save(&sample_state()).unwrap();

    let bundle = zip_of(&[("project_data.json", "<html>Error 404</html>")]);
    let err = ws.archiver.unpack(&bundle, &ws.store).unwrap_err();

    assert!(matches!(err, HarvestError::ArchiveStructural { .. }));
    assert_eq!(ws.store.load().unwrap(), sample_state());
    assert_eq!(ws.sessions.counts().unwrap().folders, 0);
}

#[test]
fn test_missing_state_document_lists_entries() {
    let ws = workspace();
    let bundle = zip_of(&[
        ("readme.txt", "hi"),
        ("images/image_001.jpg", "x"),
    ]);
    let err = ws.archiver.unpack(&bundle, &ws.store).unwrap_err();
    let diagnostics = err.diagnostics();
    assert!(diagnostics.contains(&"readme.txt".to_string()));
    assert!(diagnostics.contains(&"images/image_001.jpg".to_string()));
    assert_eq!(ws.sessions.counts().unwrap().folders, 0);
}

#[test]
fn test_state_document_found_by_basename_any_case() {
    let ws = workspace();
    let bundle = zip_of(&[("backup/Project_Data.JSON", r#"{"glossary": ["x"]}"#)]);
    let report = ws.archiver.unpack(&bundle, &ws.store).unwrap();
    assert_eq!(report.project_state.glossary, vec![json!("x")]);
    assert!(report.project_state.blocks.is_empty());
}

#[test]
fn test_corrupt_container_rejected() {
    let ws = workspace();
    let err = ws
        .archiver
        .unpack(b"definitely not a zip file", &ws.store)
        .unwrap_err();
    assert!(matches!(err, HarvestError::ArchiveStructural { .. }));
}

#[test]
fn test_unsafe_entries_collected_as_failures() {
    let ws = workspace();
    let bundle = zip_of(&[
        ("project_data.json", "{}"),
        ("images/image_001.jpg", "ok"),
        ("images/../../escape.jpg", "nope"),
    ]);
    let report = ws.archiver.unpack(&bundle, &ws.store).unwrap();
    assert_eq!(report.assets.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains("escape.jpg"));
}

#[test]
fn test_dot_dot_entry_cannot_reach_sibling_session() {
    let ws = workspace();
    let victim = ws.sessions.create_session().unwrap();
    std::fs::write(victim.folder_path.join("image_001.jpg"), b"original").unwrap();

    let sneaky = format!("images/../{}/image_001.jpg", victim.folder_name());
    let bundle = zip_of(&[
        ("project_data.json", "{}"),
        ("images/image_002.jpg", "ok"),
        (sneaky.as_str(), "overwritten"),
    ]);
    let report = ws.archiver.unpack(&bundle, &ws.store).unwrap();

    assert_eq!(report.assets.len(), 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].contains(victim.folder_name().as_str()));
    assert_eq!(
        std::fs::read(victim.folder_path.join("image_001.jpg")).unwrap(),
        b"original"
    );
}

#[test]
fn test_oversized_entry_skipped() {
    let ws = workspace();
    let oversized = vec![0u8; MAX_ENTRY_BYTES as usize + 1];

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("project_data.json", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"{}").unwrap();
    zip.start_file("images/image_001.jpg", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"small").unwrap();
    zip.start_file("images/image_002.jpg", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(&oversized).unwrap();
    let bundle = zip.finish().unwrap().into_inner();

    let report = ws.archiver.unpack(&bundle, &ws.store).unwrap();
    assert_eq!(report.assets.len(), 1);
    assert_eq!(report.assets[0].filename, "image_001.jpg");
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].starts_with("images/image_002.jpg"));
    let session = report.session.unwrap();
    assert!(!session.folder_path.join("image_002.jpg").exists());
}
