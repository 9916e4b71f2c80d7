//! Parser for the shop's `::`-separated data files.
//!
//! - users.dat:    userId::name
//! - items.dat:    itemId::name::description::category
//! - orders.dat:   userId::itemId::timestamp::synthetic
//! - ratings.dat:  userId::itemId::rating::timestamp::synthetic
//! - searches.dat: userId::itemId::timestamp::synthetic
//!
//! `synthetic` is `0` or `1`. Blank lines and lines starting with `#` are skipped.

use crate::error::{DataLoadError, Result};
use crate::types::*;
use std::path::Path;
use std::str::FromStr;

/// Read a data file into owned lines
fn read_lines(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(DataLoadError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    Ok(content.lines().map(|s| s.to_string()).collect())
}

/// Cursor over the `::`-separated fields of one line.
///
/// Rust concept: the struct borrows the line (`'a`) so splitting never copies
struct Fields<'a> {
    parts: std::str::Split<'a, &'static str>,
    file: &'static str,
    line: usize,
}

impl<'a> Fields<'a> {
    fn new(line: &'a str, file: &'static str, line_no: usize) -> Self {
        Self {
            parts: line.split("::"),
            file,
            line: line_no,
        }
    }

    fn error(&self, reason: String) -> DataLoadError {
        DataLoadError::ParseError {
            file: self.file.to_string(),
            line: self.line,
            reason,
        }
    }

    /// Next raw field, or a parse error naming the missing field
    fn next_str(&mut self, name: &str) -> Result<&'a str> {
        self.parts
            .next()
            .ok_or_else(|| self.error(format!("Missing {}", name)))
    }

    /// Next field parsed into `T`
    fn next_parsed<T>(&mut self, name: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.next_str(name)?;
        raw.trim()
            .parse()
            .map_err(|e| self.error(format!("Invalid {}: {}", name, e)))
    }

    /// Next field as the `0|1` synthetic flag
    fn next_flag(&mut self) -> Result<bool> {
        match self.next_str("synthetic")?.trim() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(DataLoadError::InvalidValue {
                field: "synthetic".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Iterate over the meaningful lines of a file with their 1-based line numbers
fn data_lines(lines: &[String]) -> impl Iterator<Item = (usize, &str)> {
    lines
        .iter()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Parse the users.dat file
pub fn parse_users(path: &Path) -> Result<Vec<User>> {
    let lines = read_lines(path)?;
    let mut users = Vec::with_capacity(lines.len());

    for (line_no, line) in data_lines(&lines) {
        let mut fields = Fields::new(line, "users.dat", line_no);
        let user = User {
            id: fields.next_parsed("userId")?,
            name: fields.next_str("name")?.to_string(),
        };
        users.push(user);
    }

    Ok(users)
}

/// Parse the items.dat file
///
/// Descriptions are free text and may be empty, but the field must be present.
pub fn parse_items(path: &Path) -> Result<Vec<Item>> {
    let lines = read_lines(path)?;
    let mut items = Vec::with_capacity(lines.len());

    for (line_no, line) in data_lines(&lines) {
        let mut fields = Fields::new(line, "items.dat", line_no);
        let item = Item {
            id: fields.next_parsed("itemId")?,
            name: fields.next_str("name")?.to_string(),
            description: fields.next_str("description")?.to_string(),
            category: fields.next_str("category")?.trim().to_string(),
        };
        items.push(item);
    }

    Ok(items)
}

/// Parse the orders.dat file into purchase records
pub fn parse_orders(path: &Path) -> Result<Vec<InteractionRecord>> {
    let lines = read_lines(path)?;
    let mut orders = Vec::with_capacity(lines.len());

    for (line_no, line) in data_lines(&lines) {
        let mut fields = Fields::new(line, "orders.dat", line_no);
        let user_id = fields.next_parsed("userId")?;
        let item_id = fields.next_parsed("itemId")?;
        let timestamp = fields.next_parsed("timestamp")?;
        let is_synthetic = fields.next_flag()?;
        orders.push(InteractionRecord::purchase(
            user_id,
            item_id,
            timestamp,
            is_synthetic,
        ));
    }

    Ok(orders)
}

/// Parse the ratings.dat file into rating records
///
/// Range checking (1..=5) happens in `DataIndex::validate`, not here.
pub fn parse_ratings(path: &Path) -> Result<Vec<InteractionRecord>> {
    let lines = read_lines(path)?;
    let mut ratings = Vec::with_capacity(lines.len());

    for (line_no, line) in data_lines(&lines) {
        let mut fields = Fields::new(line, "ratings.dat", line_no);
        let user_id = fields.next_parsed("userId")?;
        let item_id = fields.next_parsed("itemId")?;
        let rating = fields.next_parsed("rating")?;
        let timestamp = fields.next_parsed("timestamp")?;
        let is_synthetic = fields.next_flag()?;
        ratings.push(InteractionRecord::rating(
            user_id,
            item_id,
            rating,
            timestamp,
            is_synthetic,
        ));
    }

    Ok(ratings)
}

/// Parse the searches.dat file into search records
///
/// A search row links the user to an item that appeared in a search they ran.
pub fn parse_searches(path: &Path) -> Result<Vec<InteractionRecord>> {
    let lines = read_lines(path)?;
    let mut searches = Vec::with_capacity(lines.len());

    for (line_no, line) in data_lines(&lines) {
        let mut fields = Fields::new(line, "searches.dat", line_no);
        let user_id = fields.next_parsed("userId")?;
        let item_id = fields.next_parsed("itemId")?;
        let timestamp = fields.next_parsed("timestamp")?;
        let is_synthetic = fields.next_flag()?;
        searches.push(InteractionRecord::search(
            user_id,
            item_id,
            timestamp,
            is_synthetic,
        ));
    }

    Ok(searches)
}
