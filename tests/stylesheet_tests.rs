pub mod common;

use markercheck::catalog::Catalog;
use markercheck::stylesheet;

#[test]
fn standard_stylesheet_loads_without_errors() {
    let catalog = Catalog::standard();
    assert!(!catalog.is_empty());
    assert!(catalog.try_get("id").is_some());
    assert!(catalog.try_get("p").is_some());
}

#[test]
fn standard_char_descriptor_has_default_end_marker() {
    let catalog = Catalog::standard();
    let bd = catalog.try_get("bd").expect("bd should be a standard marker");
    assert_eq!(bd.effective_end_marker(), "bd*");
}

#[test]
fn unknown_field_is_reported_with_line_number() {
    let source = "\\marker zz\n\\name Zebra\n\\styletype character\n\\bogus nonsense\n";
    let result = stylesheet::load(source);
    assert!(result
        .errors
        .iter()
        .any(|e| e.to_string().contains("line 4") && e.to_string().contains("unknown field")));
}

#[test]
fn missing_name_is_reported() {
    let source = "\\marker zz\n\\styletype character\n";
    let result = stylesheet::load(source);
    assert!(result.errors.iter().any(|e| e.to_string().contains("missing a required")));
}

#[test]
fn removing_a_marker_decreases_catalog_size() {
    let mut catalog = Catalog::standard();
    let before = catalog.len();
    catalog.remove("bd");
    assert!(catalog.len() < before);
    assert!(catalog.try_get("bd").is_none());
}

#[test]
fn malformed_integer_is_reported_with_line_number() {
    let source = "\\marker zz\n\\name Zebra\n\\styletype character\n\\rank notanumber\n";
    let result = stylesheet::load(source);
    assert!(result.errors.iter().any(|e| e.to_string().contains("malformed integer")));
}
