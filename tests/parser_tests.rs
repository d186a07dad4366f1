pub mod common;

use common::check_with_standard_catalog;
use markercheck::catalog::Catalog;
use markercheck::parser::Parser;
use markercheck::scanner::Tokenizer;
use markercheck::sink::Sink;

struct NullSink;
impl Sink for NullSink {}

#[test]
fn well_formed_input_leaves_parser_stack_empty() {
    let catalog = Catalog::standard();
    let tokens = Tokenizer::new(&catalog)
        .tokenize("\\id GEN\n\\c 1\n\\p\n\\v 1 In the beginning \\bd God\\bd* made it.\n");
    let mut sink = NullSink;
    let mut parser = Parser::new(&tokens);
    parser.process_all(&mut sink);
    parser.close_all(&mut sink);
    assert!(parser.stack_is_empty());
}

#[test]
fn unclosed_character_style_at_eof_is_closed_by_close_all() {
    let catalog = Catalog::standard();
    let tokens = Tokenizer::new(&catalog).tokenize("\\id GEN\n\\p\n\\v 1 \\bd hi");
    let mut sink = NullSink;
    let mut parser = Parser::new(&tokens);
    parser.process_all(&mut sink);
    assert!(!parser.stack_is_empty());
    parser.close_all(&mut sink);
    assert!(parser.stack_is_empty());
}

#[test]
fn esbe_with_no_open_sidebar_is_unmatched() {
    let diags = check_with_standard_catalog("\\id GEN\n\\p\n\\esbe\n\\v 1 text\n", "GEN", false);
    common::assert_has_key(&diags, "unmatched_end");
}

#[test]
fn table_row_cells_out_of_order_flagged() {
    let diags =
        check_with_standard_catalog("\\id GEN\n\\p\n\\v 1\n\\tr \\tc2 second\\tc1 first\n", "GEN", false);
    common::assert_has_key(&diags, "missing_table_marker");
}

#[test]
fn reference_marker_does_not_itself_misreport() {
    let diags = check_with_standard_catalog(
        "\\id GEN\n\\p\n\\v 1 See \\ref Gen 2.1|GEN 2.1\\ref* here.\n",
        "GEN",
        false,
    );
    assert!(!diags.iter().any(|d| d.key.as_str() == "unmatched_end"));
}
