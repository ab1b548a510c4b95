//! Successful runs: insertion placement, sequencing, backups, outputs.

use super::*;
use entry_patcher::marker::{find_run_ids, run_stamp};
use entry_patcher::{FixedAnswer, PatchApplier, PatchCatalog, RewriteStatus, TargetStatus};

#[test]
fn test_block_mode_inserts_after_signature() {
    let original = "async callApi(a,b){ return x; }";
    let (_dir, file) = setup_bundle(original);

    let report = completed(
        PatchApplier::default()
            .run(&file, &options(PatchMode::Block), &mut FixedAnswer(true))
            .unwrap(),
    );

    let catalog = PatchCatalog::builtin();
    let block = catalog.targets()[0].snippet(PatchMode::Block).unwrap();
    let insertion = catalog.targets()[0].insertion(PatchMode::Block).unwrap();
    let patched = fs::read_to_string(&file).unwrap();

    assert!(insertion.starts_with(block));
    assert_eq!(
        patched,
        format!(
            "async callApi(a,b){{{insertion}{} return x; }}",
            run_stamp(&report.run_id)
        )
    );
    assert_eq!(fs::read_to_string(backup_of(&file)).unwrap(), original);
    let backup = backup_of(&file).canonicalize().unwrap();
    assert_eq!(report.backup.as_deref(), Some(backup.as_path()));
    assert_eq!(report.patched_functions(), 1);
}

#[test]
fn test_every_mode_patches_both_targets() {
    for mode in PatchMode::ALL {
        let (_dir, file) = setup_bundle(BUNDLE);
        let report = completed(
            PatchApplier::default()
                .run(&file, &options(mode), &mut FixedAnswer(true))
                .unwrap(),
        );

        let patched = fs::read_to_string(&file).unwrap();
        let catalog = PatchCatalog::builtin();
        for target in catalog.targets() {
            let expected = format!("async {}(", target.name);
            let at = patched.find(&expected).unwrap();
            let body = &patched[at..];
            let brace = body.find('{').unwrap();
            assert!(
                body[brace + 1..].starts_with(&target.insertion(mode).unwrap()),
                "{mode}: {} not patched at its entry",
                target.name
            );
        }
        assert_eq!(report.patched_functions(), 2, "{mode}");
        assert_eq!(report.mode, mode);
    }
}

#[test]
fn test_second_target_located_after_first_insertion() {
    // no rewrite sites, so insertion offsets stay valid in the final text
    let original = "async callApi(s,i){A}\nasync callApiStream(s,i){B}\n";
    let (_dir, file) = setup_bundle(original);
    let report = completed(
        PatchApplier::default()
            .run(&file, &options(PatchMode::Empty), &mut FixedAnswer(true))
            .unwrap(),
    );

    let patched = fs::read_to_string(&file).unwrap();
    let offsets: Vec<usize> = report
        .targets
        .iter()
        .map(|t| match t.status {
            TargetStatus::Patched { offset, .. } => offset,
            TargetStatus::Skipped => panic!("{} skipped", t.function),
        })
        .collect();

    assert_eq!(offsets[0], "async callApi(s,i){".len());
    assert!(patched[..offsets[1]].ends_with("async callApiStream(s,i){"));
    assert!(offsets[1] > original.find("async callApiStream(s,i){").unwrap());
}

#[test]
fn test_run_stamp_identifies_the_run() {
    let (_dir, file) = setup_bundle(BUNDLE);
    let report = completed(
        PatchApplier::default()
            .run(&file, &options(PatchMode::Random), &mut FixedAnswer(true))
            .unwrap(),
    );

    let patched = fs::read_to_string(&file).unwrap();
    assert_eq!(patched.matches(&run_stamp(&report.run_id)).count(), 2);
    assert_eq!(find_run_ids(&patched), vec![report.run_id.clone()]);
    assert!(entry_patcher::session::is_session_id(&report.run_id));
}

#[test]
fn test_missing_optional_target_is_a_warning() {
    let (_dir, file) = setup_bundle("async callApi(s){return 1}");
    let report = completed(
        PatchApplier::default()
            .run(&file, &options(PatchMode::Block), &mut FixedAnswer(true))
            .unwrap(),
    );

    assert_eq!(report.targets[1].status, TargetStatus::Skipped);
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("callApiStream")));
}

#[test]
fn test_rewrites_applied_once() {
    let (_dir, file) = setup_bundle(BUNDLE);
    let applier = PatchApplier::default();

    let first = completed(
        applier
            .run(&file, &options(PatchMode::Block), &mut FixedAnswer(true))
            .unwrap(),
    );
    assert!(first
        .rewrites
        .iter()
        .all(|r| r.status == RewriteStatus::Applied { replacements: 1 }));

    let after_first = fs::read_to_string(&file).unwrap();
    assert!(after_first.contains(r#"var t = ["timestamp", "messageId"];"#));
    assert!(after_first.contains("r.status === 999 && this.clientAuth"));

    // Operator confirms the re-run; the rewrites must not fire twice
    let second = completed(
        applier
            .run(&file, &options(PatchMode::Block), &mut FixedAnswer(true))
            .unwrap(),
    );
    assert!(second
        .rewrites
        .iter()
        .all(|r| r.status == RewriteStatus::AlreadyApplied));
    assert!(!second.prior_markers.is_empty());

    let after_second = fs::read_to_string(&file).unwrap();
    assert_eq!(after_second.matches("status === 999").count(), 1);
}

#[test]
fn test_dry_run_writes_nothing() {
    let (dir, file) = setup_bundle(BUNDLE);
    let before = listing(dir.path());

    let options = ApplyOptions {
        mode: PatchMode::Stealth,
        dry_run: true,
        ..ApplyOptions::default()
    };
    let report = completed(
        PatchApplier::default()
            .run(&file, &options, &mut FixedAnswer(false))
            .unwrap(),
    );

    assert_eq!(listing(dir.path()), before);
    assert_eq!(fs::read_to_string(&file).unwrap(), BUNDLE);
    assert_eq!(report.original, BUNDLE);
    assert!(report.patched.len() > BUNDLE.len());
    assert!(report.output.is_none());
    assert!(report.backup.is_none());
}

#[test]
fn test_separate_output_leaves_input_untouched() {
    let (dir, file) = setup_bundle(BUNDLE);
    let output = dir.path().join("patched.js");

    let options = ApplyOptions {
        mode: PatchMode::Debug,
        output: Some(output.clone()),
        dry_run: false,
    };
    let report = completed(
        PatchApplier::default()
            .run(&file, &options, &mut FixedAnswer(true))
            .unwrap(),
    );

    assert_eq!(fs::read_to_string(&file).unwrap(), BUNDLE);
    assert!(!backup_of(&file).exists());
    assert!(report.backup.is_none());

    let written = fs::read_to_string(&output).unwrap();
    assert_eq!(written, report.patched);
    assert!(written.contains("console.debug"));
}

#[test]
fn test_output_equal_to_input_patches_in_place() {
    let (_dir, file) = setup_bundle(BUNDLE);
    let options = ApplyOptions {
        mode: PatchMode::Block,
        output: Some(file.clone()),
        dry_run: false,
    };
    completed(
        PatchApplier::default()
            .run(&file, &options, &mut FixedAnswer(true))
            .unwrap(),
    );

    assert_ne!(fs::read_to_string(&file).unwrap(), BUNDLE);
    assert_eq!(fs::read_to_string(backup_of(&file)).unwrap(), BUNDLE);
}

#[test]
#[cfg(unix)]
fn test_file_mode_survives_patch_and_restore() {
    use std::os::unix::fs::PermissionsExt;

    let (_dir, file) = setup_bundle(BUNDLE);
    fs::set_permissions(&file, fs::Permissions::from_mode(0o644)).unwrap();
    let mode = |p: &Path| fs::metadata(p).unwrap().permissions().mode() & 0o777;

    let applier = PatchApplier::default();
    completed(
        applier
            .run(&file, &options(PatchMode::Block), &mut FixedAnswer(true))
            .unwrap(),
    );
    assert_eq!(mode(&file), 0o644);
    assert_eq!(mode(&backup_of(&file)), 0o644);

    applier.restore(&file).unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), BUNDLE);
    assert_eq!(mode(&file), 0o644);
}

#[test]
fn test_restore_recreates_deleted_target() {
    let (_dir, file) = setup_bundle(BUNDLE);
    let applier = PatchApplier::default();
    completed(
        applier
            .run(&file, &options(PatchMode::Block), &mut FixedAnswer(true))
            .unwrap(),
    );

    fs::remove_file(&file).unwrap();
    let (target, backup) = applier.restore_paths(&file).unwrap();
    assert!(target.ends_with("extension.js"));
    assert!(backup.ends_with("extension_ori.js"));

    applier.restore(&file).unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), BUNDLE);
}

#[test]
fn test_status_then_restore() {
    let (_dir, file) = setup_bundle(BUNDLE);
    let applier = PatchApplier::default();

    let before = applier.inspect(&file).unwrap();
    assert!(!before.is_patched());
    assert!(!before.backup_exists);
    assert!(before.targets.iter().all(|t| t.offset.is_some()));

    let report = completed(
        applier
            .run(&file, &options(PatchMode::Block), &mut FixedAnswer(true))
            .unwrap(),
    );

    let after = applier.inspect(&file).unwrap();
    assert!(after.is_patched());
    assert!(after.backup_exists);
    assert_eq!(after.run_ids, vec![report.run_id.clone()]);

    applier.restore(&file).unwrap();
    assert_eq!(fs::read_to_string(&file).unwrap(), BUNDLE);
    assert!(backup_of(&file).exists());
}
