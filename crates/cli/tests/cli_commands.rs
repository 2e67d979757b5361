use std::fs;
use std::path::{Path, PathBuf};

use photohub_cli::{Command, ProjectAction, Settings, commands::run_with};
use photohub_core::ProjectId;
use photohub_jobs::JobEngineConfig;
use photohub_workflow::ProjectStatus;

fn settings(data_dir: &Path) -> Settings {
    Settings {
        data_dir: data_dir.to_path_buf(),
        engine: JobEngineConfig::default(),
    }
}

fn exec(settings: &Settings, command: Command) -> anyhow::Result<String> {
    let mut out = Vec::new();
    run_with(settings, command, &mut out)?;
    Ok(String::from_utf8(out).unwrap())
}

fn create_project(settings: &Settings, name: &str) -> ProjectId {
    let out = exec(
        settings,
        Command::Project(ProjectAction::Create { name: name.into() }),
    )
    .unwrap();
    out.trim().parse().unwrap()
}

fn status(settings: &Settings, project_id: ProjectId) -> String {
    exec(settings, Command::Project(ProjectAction::Status { project_id })).unwrap()
}

fn write_card(dir: &Path) {
    fs::create_dir_all(dir.join("DCIM/100CANON")).unwrap();
    fs::write(dir.join("DCIM/100CANON/IMG_0001.CR2"), b"raw-1").unwrap();
    fs::write(dir.join("DCIM/100CANON/IMG_0002.CR2"), b"raw-2").unwrap();
    fs::write(dir.join("DCIM/100CANON/IMG_0002.JPG"), b"jpg-2").unwrap();
    fs::write(dir.join("MISC.TXT"), b"not a photo").unwrap();
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

#[test]
fn import_and_export_drive_the_project_to_delivered() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(&tmp.path().join("data"));
    let card = tmp.path().join("card");
    let library = tmp.path().join("library");
    let delivery = tmp.path().join("delivery");
    write_card(&card);

    let project_id = create_project(&settings, "Garden wedding");
    assert!(status(&settings, project_id).starts_with("New"));

    let out = exec(
        &settings,
        Command::Import {
            project_id,
            source_dir: card.clone(),
            dest_dir: library.clone(),
        },
    )
    .unwrap();
    assert!(out.contains("import succeeded"), "{out}");
    assert!(out.contains("is culling"), "{out}");
    assert_eq!(
        files_in(&library),
        vec!["IMG_0001.CR2", "IMG_0002.CR2", "IMG_0002.JPG"]
    );

    let assets: Vec<PathBuf> = vec![library.join("IMG_0001.CR2"), library.join("IMG_0002.JPG")];
    let out = exec(
        &settings,
        Command::Export {
            project_id,
            destination: delivery.clone(),
            assets,
        },
    )
    .unwrap();
    assert!(out.contains("is delivered"), "{out}");
    assert_eq!(files_in(&delivery), vec!["IMG_0001.CR2", "IMG_0002.JPG"]);
}

#[test]
fn export_with_missing_assets_within_tolerance_reports_skips() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(&tmp.path().join("data"));
    let card = tmp.path().join("card");
    write_card(&card);
    let project_id = create_project(&settings, "Skips");
    exec(
        &settings,
        Command::Import {
            project_id,
            source_dir: card.clone(),
            dest_dir: tmp.path().join("library"),
        },
    )
    .unwrap();

    let out = exec(
        &settings,
        Command::Export {
            project_id,
            destination: tmp.path().join("delivery"),
            assets: vec![
                card.join("DCIM/100CANON/IMG_0001.CR2"),
                tmp.path().join("missing.jpg"),
            ],
        },
    )
    .unwrap();

    assert!(out.contains("skipped"), "{out}");
    assert!(out.contains("missing.jpg"), "{out}");
    assert!(!tmp.path().join("delivery/missing.jpg.part").exists());
}

#[test]
fn illegal_transition_reports_the_rule() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let project_id = create_project(&settings, "Rules");

    let err = exec(
        &settings,
        Command::Project(ProjectAction::Transition {
            project_id,
            status: ProjectStatus::Delivered,
        }),
    )
    .unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("transition rejected"), "{message}");
    assert!(message.contains("new -> delivered"), "{message}");
    assert!(message.contains("allowed from new: importing"), "{message}");
}

#[test]
fn export_before_import_is_rejected_and_nothing_is_written() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(&tmp.path().join("data"));
    let asset = tmp.path().join("IMG.jpg");
    fs::write(&asset, b"jpg").unwrap();
    let project_id = create_project(&settings, "Early");

    let err = exec(
        &settings,
        Command::Export {
            project_id,
            destination: tmp.path().join("delivery"),
            assets: vec![asset],
        },
    )
    .unwrap_err();

    assert!(err.to_string().contains("new -> exporting"), "{err}");
    assert!(!tmp.path().join("delivery").exists());
}

#[test]
fn status_survives_a_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(tmp.path());
    let project_id = create_project(&settings, "Persistent");

    exec(
        &settings,
        Command::Project(ProjectAction::Transition {
            project_id,
            status: ProjectStatus::Importing,
        }),
    )
    .unwrap();

    // Every exec opens the store afresh, as a new process would.
    let out = status(&settings, project_id);
    assert!(out.starts_with("Importing"), "{out}");
    assert!(out.contains("next: culling, new"), "{out}");

    let listing = exec(&settings, Command::Project(ProjectAction::List)).unwrap();
    assert!(listing.contains("Persistent"), "{listing}");
    assert!(listing.contains(&project_id.to_string()), "{listing}");
}

#[test]
fn import_from_an_empty_folder_fails_before_submitting() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = settings(&tmp.path().join("data"));
    let empty = tmp.path().join("empty");
    fs::create_dir_all(&empty).unwrap();
    let project_id = create_project(&settings, "Nothing");

    let err = exec(
        &settings,
        Command::Import {
            project_id,
            source_dir: empty,
            dest_dir: tmp.path().join("library"),
        },
    )
    .unwrap_err();

    assert!(err.to_string().contains("no image or RAW files"), "{err}");
    assert!(status(&settings, project_id).starts_with("New"));
}
