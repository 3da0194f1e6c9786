//! Interactive selection menu
//!
//! A small state machine over a `Catalog`:
//!
//! ```text
//! CategorySelect → RepoSelect → LinkSelect → Pipeline → CategorySelect
//!        ↓
//!      Exit
//! ```
//!
//! Input and output are generic so the loop can be driven from tests.
//! Reaching the end of input behaves like choosing Exit.

use crate::catalog::Catalog;
use std::io::{self, BufRead, Write};

/// Where the menu is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuState {
    CategorySelect,
    RepoSelect { category: usize },
    LinkSelect { category: usize, repo: usize },
    Pipeline { link: String },
    Exit,
}

/// What one numbered screen's answer means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Item(usize),
    Back,
    Invalid,
}

/// Parse a menu answer the lenient way: leading digits, anything else is 0.
pub fn parse_choice(input: &str) -> usize {
    let digits: String = input
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

fn classify(choice: usize, len: usize) -> Choice {
    if (1..=len).contains(&choice) {
        Choice::Item(choice - 1)
    } else if choice == len + 1 {
        Choice::Back
    } else {
        Choice::Invalid
    }
}

pub struct Menu<'c, R, W> {
    catalog: &'c Catalog,
    input: R,
    output: W,
}

impl<'c, R: BufRead, W: Write> Menu<'c, R, W> {
    pub fn new(catalog: &'c Catalog, input: R, output: W) -> Self {
        Self {
            catalog,
            input,
            output,
        }
    }

    /// Run until the user exits. `on_link` is called with each selected link.
    pub fn run<F: FnMut(&str)>(&mut self, mut on_link: F) -> io::Result<()> {
        let mut state = MenuState::CategorySelect;
        while state != MenuState::Exit {
            state = self.step(state, &mut on_link)?;
        }
        Ok(())
    }

    /// Perform one screen and return the next state.
    pub fn step<F: FnMut(&str)>(&mut self, state: MenuState, on_link: &mut F) -> io::Result<MenuState> {
        let catalog = self.catalog;
        let next = match state {
            MenuState::CategorySelect => {
                let names: Vec<&str> = catalog.categories.iter().map(|c| c.name.as_str()).collect();
                let Some(answer) = self.prompt("Select a category:", &names, "Exit")? else {
                    return Ok(MenuState::Exit);
                };
                match classify(answer, names.len()) {
                    Choice::Item(category) => {
                        writeln!(self.output, "\nSelected category: {}", names[category])?;
                        MenuState::RepoSelect { category }
                    }
                    Choice::Back => MenuState::Exit,
                    Choice::Invalid => {
                        writeln!(self.output, "Invalid choice. Please try again.")?;
                        MenuState::CategorySelect
                    }
                }
            }
            MenuState::RepoSelect { category } => {
                let repos = &catalog.categories[category].repositories;
                let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
                let Some(answer) = self.prompt("Select a repository:", &names, "Back to Main Menu")? else {
                    return Ok(MenuState::Exit);
                };
                match classify(answer, names.len()) {
                    Choice::Item(repo) => {
                        writeln!(self.output, "\nSelected repository: {}", names[repo])?;
                        MenuState::LinkSelect { category, repo }
                    }
                    Choice::Back => MenuState::CategorySelect,
                    Choice::Invalid => {
                        writeln!(self.output, "Invalid choice. Returning to main menu.")?;
                        MenuState::CategorySelect
                    }
                }
            }
            MenuState::LinkSelect { category, repo } => {
                let links = &catalog.categories[category].repositories[repo].links;
                let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();
                let Some(answer) = self.prompt("Available links:", &urls, "Back to Category Menu")? else {
                    return Ok(MenuState::Exit);
                };
                match classify(answer, urls.len()) {
                    Choice::Item(link) => MenuState::Pipeline {
                        link: urls[link].to_string(),
                    },
                    Choice::Back => MenuState::CategorySelect,
                    Choice::Invalid => {
                        writeln!(self.output, "Invalid choice. Returning to repository menu.")?;
                        MenuState::CategorySelect
                    }
                }
            }
            MenuState::Pipeline { link } => {
                writeln!(self.output, "Executing commands...")?;
                self.output.flush()?;
                on_link(&link);
                MenuState::CategorySelect
            }
            MenuState::Exit => MenuState::Exit,
        };
        Ok(next)
    }

    /// Print a numbered list plus a final back/exit entry, read one answer.
    /// `None` at end of input.
    fn prompt(&mut self, title: &str, items: &[&str], last: &str) -> io::Result<Option<usize>> {
        writeln!(self.output, "\n{}", title)?;
        for (i, item) in items.iter().enumerate() {
            writeln!(self.output, "{}. {}", i + 1, item)?;
        }
        writeln!(self.output, "{}. {}", items.len() + 1, last)?;
        write!(self.output, "Enter your choice: ")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(parse_choice(&line)))
    }
}
