//! Offline runs over a recorded portal directory.

use marangatu_cli::config::{parse_env, Cli, Settings};
use marangatu_cli::app;
use std::fs;
use std::path::Path;

fn write(root: &Path, rel: &str, body: &str) {
    let file = root.join(rel);
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(file, body).unwrap();
}

fn settings(working_dir: &Path) -> Settings {
    fs::write(
        working_dir.join(".env"),
        "export USERNAME=\"80000000\"\nexport PASSWORD=\"secret\"\nMOCKUP_DIR=__mockup__\n",
    )
    .unwrap();
    let env = marangatu_cli::config::load_env_files(working_dir);
    Settings::resolve(&Cli::default(), &env, working_dir.to_path_buf())
}

#[tokio::test]
async fn test_logged_in_with_nothing_due() {
    let dir = tempfile::tempdir().unwrap();
    let mockup = dir.path().join("__mockup__");
    write(&mockup, "eset/index.html", r#"<a href="/eset/logout">Salir</a>"#);
    write(
        &mockup,
        "eset/perfil/publico.json",
        r#"{"rucActivo":"80000000","dvActivo":"5","nombre":"PEREZ JUAN"}"#,
    );
    write(
        &mockup,
        "eset/perfil/informacionControlesPerfil.json",
        r#"{"debeActualizar":false}"#,
    );
    write(&mockup, "eset/perfil/vencimientos.json", "[]");

    let settings = settings(dir.path());
    assert_eq!(settings.mockup_dir.as_deref(), Some(mockup.as_path()));
    assert_eq!(app::run(settings).await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_form_is_reported_without_failing_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mockup = dir.path().join("__mockup__");
    write(&mockup, "eset/index.html", r#"<a href="/eset/logout">Salir</a>"#);
    write(
        &mockup,
        "eset/perfil/publico.json",
        r#"{"rucActivo":"80000000","dvActivo":"5","nombre":"PEREZ JUAN"}"#,
    );
    write(
        &mockup,
        "eset/perfil/informacionControlesPerfil.json",
        r#"{"debeActualizar":false}"#,
    );
    write(
        &mockup,
        "eset/perfil/vencimientos.json",
        r#"[{"impuesto":"515","periodo":"202409"}]"#,
    );
    write(&mockup, "eset/perfil/menu.json", "[]");

    assert_eq!(app::run(settings(dir.path())).await.unwrap(), 0);
}

#[test]
fn test_env_file_credentials_feed_settings() {
    let env = parse_env("USERNAME=1234567\nPASSWORD=x\n");
    let settings = Settings::resolve(&Cli::default(), &env, ".".into());
    assert_eq!(settings.username, "1234567");
    assert_eq!(settings.password, "x");
}
