use markercheck::book_id::StandardCanon;
use markercheck::catalog::Catalog;
use markercheck::diagnostics::{Diagnostic, ValidatingSink};
use markercheck::parser::Parser;
use markercheck::scanner::Tokenizer;

/// Runs `source` through the standard stylesheet's catalog end to end
/// (tokenize, parse, validate) and returns whatever diagnostics came out,
/// analogous to the teacher's `assert_parsed_doc_matches_expected_asg`.
pub fn check_with_standard_catalog(source: &str, book_code: &str, usfm2: bool) -> Vec<Diagnostic> {
    let catalog = Catalog::standard();
    check(&catalog, source, book_code, usfm2)
}

pub fn check(catalog: &Catalog, source: &str, book_code: &str, usfm2: bool) -> Vec<Diagnostic> {
    let tokens = Tokenizer::new(catalog).tokenize(source);
    let oracle = StandardCanon;
    let mut sink = ValidatingSink::new(catalog, &oracle, book_code, usfm2);
    let mut parser = Parser::new(&tokens);
    parser.process_all(&mut sink);
    parser.close_all(&mut sink);
    sink.into_diagnostics()
}

pub fn assert_has_key(diagnostics: &[Diagnostic], key: &str) {
    assert!(
        diagnostics.iter().any(|d| d.key.as_str() == key),
        "expected a diagnostic with key #{key}, got: {diagnostics:?}"
    );
}

pub fn assert_no_diagnostics(diagnostics: &[Diagnostic]) {
    assert!(diagnostics.is_empty(), "expected no diagnostics, got: {diagnostics:?}");
}
