//! Catalog parsing and menu navigation driven through in-memory I/O

use squashrepo::{Catalog, Menu};
use std::io::Cursor;

const CATALOG: &str = "\
Apex Squashfs Repos
Apex KdeLinux Stable Repos
https://example.com/apex-stable.squashfs
https://example.com/apex-stable-mirror.squashfs
Apex KdeLinux Testing Repos
https://example.com/apex-testing.squashfs
Spitfire Iso Repos
Spitfire Repos
https://example.com/spitfire.iso
";

/// Feed `input` to a menu over `CATALOG`; return selected links and output.
fn drive(input: &str) -> (Vec<String>, String) {
    let catalog = Catalog::parse(CATALOG);
    let mut output = Vec::new();
    let mut selected = Vec::new();
    {
        let mut menu = Menu::new(&catalog, Cursor::new(input.as_bytes()), &mut output);
        menu.run(|link| selected.push(link.to_string())).unwrap();
    }
    (selected, String::from_utf8(output).unwrap())
}

#[test]
fn test_catalog_structure() {
    let catalog = Catalog::parse(CATALOG);
    let names: Vec<&str> = catalog.categories.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["Apex Squashfs Repos", "Spitfire Iso Repos"]);
    assert_eq!(catalog.categories[0].repositories.len(), 2);
    assert_eq!(catalog.link_count(), 4);
}

#[test]
fn test_select_link_runs_callback_and_returns_to_categories() {
    // category 1, repository 1, link 2, then exit (3 = Exit with two categories)
    let (selected, output) = drive("1\n1\n2\n3\n");

    assert_eq!(selected, vec!["https://example.com/apex-stable-mirror.squashfs"]);
    assert!(output.contains("Selected category: Apex Squashfs Repos"));
    assert!(output.contains("Selected repository: Apex KdeLinux Stable Repos"));
    assert!(output.contains("Executing commands..."));
    assert_eq!(output.matches("Select a category:").count(), 2);
}

#[test]
fn test_exit_immediately() {
    let (selected, output) = drive("3\n");
    assert!(selected.is_empty());
    assert!(output.contains("1. Apex Squashfs Repos"));
    assert!(output.contains("3. Exit"));
}

#[test]
fn test_end_of_input_exits() {
    let (selected, _) = drive("1\n");
    assert!(selected.is_empty());
}

#[test]
fn test_invalid_category_reprompts() {
    let (selected, output) = drive("9\nabc\n3\n");
    assert!(selected.is_empty());
    assert_eq!(output.matches("Invalid choice. Please try again.").count(), 2);
}

#[test]
fn test_back_from_repository_menu() {
    // Apex has two repositories, so 3 is "Back to Main Menu"
    let (selected, output) = drive("1\n3\n2\n1\n1\n3\n");
    assert_eq!(selected, vec!["https://example.com/spitfire.iso"]);
    assert!(output.contains("3. Back to Main Menu"));
}

#[test]
fn test_invalid_repository_returns_to_main_menu() {
    let (selected, output) = drive("1\n7\n3\n");
    assert!(selected.is_empty());
    assert!(output.contains("Invalid choice. Returning to main menu."));
}

#[test]
fn test_invalid_link_returns_to_categories() {
    let (selected, output) = drive("1\n2\n0\n3\n");
    assert!(selected.is_empty());
    assert!(output.contains("Invalid choice. Returning to repository menu."));
    assert_eq!(output.matches("Select a category:").count(), 2);
}

#[test]
fn test_back_from_link_menu() {
    let (selected, output) = drive("1\n2\n2\n3\n");
    assert!(selected.is_empty());
    assert!(output.contains("2. Back to Category Menu"));
}

#[test]
fn test_several_selections_in_one_session() {
    let (selected, _) = drive("1\n1\n1\n2\n1\n1\n3\n");
    assert_eq!(
        selected,
        vec![
            "https://example.com/apex-stable.squashfs",
            "https://example.com/spitfire.iso",
        ]
    );
}
