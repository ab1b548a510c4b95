//! Terminal failures: nothing written before the mandatory target is found,
//! and commit failures surface restore outcomes.

use super::*;
use entry_patcher::{
    CatalogError, FixedAnswer, Gate, LocateError, PatchApplier, PatchCatalog, PatchError,
    SafetyError, TargetFunction,
};

#[test]
fn test_missing_mandatory_target_writes_nothing() {
    let source = "async callApiStream(s){return s} function callApi(){}";
    let (dir, file) = setup_bundle(source);
    let before = listing(dir.path());

    let result = PatchApplier::default().run(&file, &options(PatchMode::Block), &mut FixedAnswer(true));

    assert!(matches!(
        result,
        Err(PatchError::Locate(LocateError::NotFound { ref function })) if function == "callApi"
    ));
    assert_eq!(listing(dir.path()), before);
    assert_eq!(fs::read_to_string(&file).unwrap(), source);
}

#[test]
fn test_missing_input_file() {
    let dir = TempDir::new().unwrap();
    let result = PatchApplier::default().run(
        &dir.path().join("extension.js"),
        &options(PatchMode::Block),
        &mut FixedAnswer(true),
    );
    assert!(matches!(result, Err(PatchError::Input(SafetyError::Missing(_)))));
    assert!(listing(dir.path()).is_empty());
}

#[test]
fn test_unsupported_mode_rejected_before_io() {
    const BLOCK_ONLY: &[(PatchMode, &str)] = &[(PatchMode::Block, "return;")];
    let applier = PatchApplier::new(PatchCatalog::new(
        vec![TargetFunction {
            name: "callApi",
            required: true,
            snippets: BLOCK_ONLY,
            session_tail: "",
        }],
        vec![],
    ));

    // The input does not even exist: mode validation must fail first
    let dir = TempDir::new().unwrap();
    let result = applier.run(
        &dir.path().join("missing.js"),
        &options(PatchMode::Debug),
        &mut FixedAnswer(true),
    );
    assert!(matches!(
        result,
        Err(PatchError::Catalog(CatalogError::MissingSnippet { .. }))
    ));
}

#[test]
fn test_non_utf8_input_rejected() {
    let dir = TempDir::new().unwrap();
    let file = dir.path().join("extension.js");
    fs::write(&file, [0x61, 0xff, 0xfe, 0x62]).unwrap();

    let result = PatchApplier::default().run(&file, &options(PatchMode::Block), &mut FixedAnswer(true));
    assert!(matches!(result, Err(PatchError::Read { .. })));
    assert!(!backup_of(&file).exists());
}

#[test]
fn test_output_onto_backup_rejected() {
    let (_dir, file) = setup_bundle(BUNDLE);
    let options = ApplyOptions {
        mode: PatchMode::Block,
        output: Some(backup_of(&file)),
        dry_run: false,
    };
    let result = PatchApplier::default().run(&file, &options, &mut FixedAnswer(true));
    assert!(matches!(
        result,
        Err(PatchError::Input(SafetyError::OutputIsBackup { .. }))
    ));
    assert_eq!(fs::read_to_string(&file).unwrap(), BUNDLE);
}

#[test]
fn test_commit_and_restore_failure_is_inconsistent() {
    let (_dir, file) = setup_bundle(BUNDLE);
    // an existing backup gives us a gate to hook into after the read
    fs::write(backup_of(&file), "older backup").unwrap();

    // Replace the target with a directory once the text is loaded; both the
    // commit and the restore then fail to rename onto it.
    let target = file.clone();
    let mut confirm = |gate: &Gate| {
        if let Gate::BackupExists { .. } = gate {
            fs::remove_file(&target).unwrap();
            fs::create_dir(&target).unwrap();
            fs::write(target.join("keep"), "x").unwrap();
        }
        true
    };

    let err = PatchApplier::default()
        .run(&file, &options(PatchMode::Block), &mut confirm)
        .unwrap_err();

    assert!(err.is_inconsistent(), "unexpected error: {err}");
    match &err {
        PatchError::CommitUnrestored { path, backup, .. } => {
            assert!(path.ends_with("extension.js"));
            assert!(backup.ends_with("extension_ori.js"));
        }
        other => panic!("expected CommitUnrestored, got {other:?}"),
    }

    // The backup written by this run holds the original text
    assert_eq!(fs::read_to_string(backup_of(&file)).unwrap(), BUNDLE);
}

fn failing_write(_path: &Path, _content: &[u8]) -> std::io::Result<()> {
    Err(std::io::Error::other("disk full"))
}

#[test]
fn test_commit_failure_restores_original() {
    let (_dir, file) = setup_bundle(BUNDLE);
    let applier = PatchApplier::default().with_commit_writer(failing_write);

    let err = applier
        .run(&file, &options(PatchMode::Block), &mut FixedAnswer(true))
        .unwrap_err();

    assert!(!err.is_inconsistent());
    match &err {
        PatchError::CommitRestored { path, source } => {
            assert!(path.ends_with("extension.js"));
            assert_eq!(source.to_string(), "disk full");
        }
        other => panic!("expected CommitRestored, got {other:?}"),
    }
    assert!(err.to_string().contains("original file restored from backup"));

    assert_eq!(fs::read_to_string(&file).unwrap(), BUNDLE);
    assert_eq!(fs::read_to_string(backup_of(&file)).unwrap(), BUNDLE);
}

#[test]
fn test_restore_without_backup() {
    let (_dir, file) = setup_bundle(BUNDLE);
    let result = PatchApplier::default().restore(&file);
    assert!(matches!(result, Err(PatchError::NoBackup(_))));
}
