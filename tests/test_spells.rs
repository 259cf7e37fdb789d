//! End-to-end spell tests over the bundled `spells/` directory.

use std::path::Path;

use grimoire::config::FailureOutput;
use grimoire::spells::sandbox::{LlmCapability, ScriptSandbox};
use grimoire::spells::{CastRequest, SpellService};

fn service() -> SpellService {
    SpellService::new(
        ScriptSandbox::new(LlmCapability::Unavailable),
        FailureOutput::Empty,
    )
}

fn cast_by_id(svc: &SpellService, id: &str, input: &str) -> grimoire::spells::CastOutcome {
    svc.cast(&CastRequest {
        spell_id: id.to_string(),
        script_file: None,
        script: None,
        input: input.to_string(),
    })
}

#[test]
fn bundled_spells_discover() {
    let svc = service();
    let count = svc.discover(Path::new("spells"));
    assert!(count >= 4, "expected bundled spells, found {count}");

    let ids: Vec<String> = svc.list().into_iter().map(|d| d.id).collect();
    for expected in ["fix_text", "mirror", "shout", "word_count"] {
        assert!(ids.contains(&expected.to_string()), "missing spell {expected}");
    }
}

#[test]
fn shout_uppercases() {
    let svc = service();
    svc.discover(Path::new("spells"));

    let outcome = cast_by_id(&svc, "shout", "abc");
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.output, "ABC");
}

#[test]
fn word_count_counts() {
    let svc = service();
    svc.discover(Path::new("spells"));

    let outcome = cast_by_id(&svc, "word_count", "hello world");
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.output, "2 words, 11 characters");
}

#[test]
fn word_count_handles_newlines() {
    let svc = service();
    svc.discover(Path::new("spells"));

    let outcome = cast_by_id(&svc, "word_count", "one\ntwo three");
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert!(outcome.output.starts_with("3 words"));
}

#[test]
fn mirror_is_a_fallback_spell() {
    let svc = service();
    svc.discover(Path::new("spells"));

    let outcome = cast_by_id(&svc, "mirror", "hi");
    assert!(outcome.success, "error: {:?}", outcome.error);
    assert_eq!(outcome.output, "hi\n");
}

#[test]
fn fix_text_fails_gracefully_without_llm() {
    let svc = service();
    svc.discover(Path::new("spells"));

    let outcome = cast_by_id(&svc, "fix_text", "teh text");
    assert!(!outcome.success);
    assert!(outcome.error.expect("error message").contains("unavailable"));
}

#[test]
fn listing_is_sorted_and_carries_script_paths() {
    let svc = service();
    svc.discover(Path::new("spells"));

    let spells = svc.list();
    let ids: Vec<String> = spells.iter().map(|d| d.id.clone()).collect();
    let sorted = {
        let mut s = ids.clone();
        s.sort();
        s
    };
    assert_eq!(ids, sorted);

    let shout = spells.into_iter().find(|d| d.id == "shout").unwrap();
    assert!(shout.script_file.ends_with("shout.rhai"));
}
