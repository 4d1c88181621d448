use std::path::{Path, PathBuf};
use translator::{error_codes, logging};
use translator::{translate_program, Program, TranslateError, TranslatorConfig};
use walkdir::WalkDir;

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("fixtures")
}

/// Fixture documents, excluding the deliberately broken ones under
/// `invalid/`
fn fixture_files(invalid: bool) -> Vec<PathBuf> {
    let root = fixtures_dir();
    let mut files: Vec<PathBuf> = WalkDir::new(&root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
        .map(|e| e.path().to_path_buf())
        .filter(|p| p.strip_prefix(&root).map_or(false, |rel| rel.starts_with("invalid") == invalid))
        .collect();
    files.sort();
    files
}

#[test]
fn test_every_fixture_translates() {
    logging::init_test();
    let files = fixture_files(false);
    assert!(!files.is_empty(), "no fixtures found in {}", fixtures_dir().display());

    for path in files {
        let program = match Program::load(&path) {
            Ok(program) => program,
            Err(e) => panic!("{}: {}", path.display(), e),
        };
        let outputs = match translate_program(&program, TranslatorConfig::default()) {
            Ok(outputs) => outputs,
            Err(e) => panic!("{}: {}", path.display(), e),
        };
        assert_eq!(outputs.len(), program.modules.len());
        for output in &outputs {
            assert!(output.header.contains("#define IMTSIZE 40"), "{}", output.name);
            assert!(output.body.starts_with(&format!("#include \"{}.h\"", output.name)));
        }
        let executables = program.modules.iter().filter(|m| m.is_executable()).count();
        let mains = outputs.iter().filter(|o| o.body.contains("int main(int argc, char *argv[])")).count();
        assert_eq!(mains, executables, "{}", path.display());
    }
}

#[test]
fn test_hello_fixture_runs_type_initializer_on_entry() {
    let program = Program::load(&fixtures_dir().join("hello.json")).unwrap();
    let outputs = translate_program(&program, TranslatorConfig::default()).unwrap();
    let hello = outputs.iter().find(|o| o.body.contains("int main(")).unwrap();

    assert!(hello.body.contains("void CheckIfStaticConstructorNeedsToRunFor"));
    assert!(hello.body.contains("CtorCharPtr((uintptr_t)&L\"Hello, world\""));
    assert!(hello.body.contains("GetThreadLocalValue(appdomain_static_block_tlsIndex)"));
    assert!(hello.header.contains("extern uint32_t "));
}

#[test]
fn test_invalid_fixtures_are_rejected() {
    logging::init_test();
    let files = fixture_files(true);
    assert!(!files.is_empty());
    for path in files {
        match Program::load(&path) {
            Ok(_) => panic!("{} should not load", path.display()),
            Err(e @ TranslateError::DanglingId { .. }) => {
                assert_eq!(e.code(), error_codes::DANGLING_ID);
                assert!(e.to_string().starts_with("E6"), "{}", e);
            }
            Err(other) => panic!("{}: unexpected error {}", path.display(), other),
        }
    }
}

#[test]
fn test_fixture_survives_json_round_trip() {
    let program = Program::load(&fixtures_dir().join("hello.json")).unwrap();
    let text = program.to_json().unwrap();
    let reloaded = Program::from_json(&text).unwrap();
    assert_eq!(reloaded.types.len(), program.types.len());
    assert_eq!(reloaded.module_by_name("Hello").unwrap(), program.module_by_name("Hello").unwrap());
}
