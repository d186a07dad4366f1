pub mod common;

use markercheck::catalog::Catalog;
use markercheck::scanner::Tokenizer;
use markercheck::tokens::TokenKind;

#[test]
fn round_trip_through_to_usfm_retokenizes_equal() {
    let catalog = Catalog::standard();
    let tokenizer = Tokenizer::new(&catalog);
    let source = "\\id GEN\n\\p\n\\v 1 In the beginning \\bd God\\bd* created.\n";
    let first = tokenizer.tokenize(source);
    let rejoined = Tokenizer::to_usfm(&first);
    let second = tokenizer.tokenize(&rejoined);

    let kinds_first: Vec<_> = first.iter().map(|t| t.kind()).collect();
    let kinds_second: Vec<_> = second.iter().map(|t| t.kind()).collect();
    assert_eq!(kinds_first, kinds_second);
}

#[test]
fn nested_character_marker_is_flagged_nested() {
    let catalog = Catalog::standard();
    let tokenizer = Tokenizer::new(&catalog);
    let tokens = tokenizer.tokenize("\\id GEN\n\\p\n\\v 1 \\bd bold \\+it italic\\+it*\\bd*\n");
    let nested = tokens
        .iter()
        .find(|t| t.marker() == Some("it") && t.kind() == TokenKind::Character)
        .expect("nested +it token");
    assert!(nested.nested);
}

#[test]
fn verse_token_carries_number_as_data() {
    let catalog = Catalog::standard();
    let tokenizer = Tokenizer::new(&catalog);
    let tokens = tokenizer.tokenize("\\id GEN\n\\p\n\\v 1 Hello\n");
    let verse = tokens.iter().find(|t| t.kind() == TokenKind::Verse).unwrap();
    assert_eq!(verse.data, vec!["1".to_string()]);
}
