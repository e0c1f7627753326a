//! ソース行情報

use crate::loader::DwarfReader;
use crate::{DwarfLoader, Result};
use std::ops::Range;

/// ソース行情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineInfo {
    pub file: String,
    pub line: u32,
    pub column: Option<u32>,
}

impl std::fmt::Display for LineInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.column {
            Some(column) => write!(f, "{}:{}:{}", self.file, self.line, column),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// 行テーブルの1行
#[derive(Debug, Clone)]
struct LineRow {
    address: u64,
    file: String,
    line: u32,
    is_stmt: bool,
    /// シーケンス終端（この行のアドレスは直前の行の終端を示す）
    end_sequence: bool,
}

/// 行テーブル
///
/// `file:line` からアドレスへの変換と、アドレスを含む行範囲の計算を行います。
/// アドレスから行への変換は addr2line に任せます。
pub struct LineTable {
    rows: Vec<LineRow>,
    context: Option<addr2line::Context<DwarfReader>>,
}

impl LineTable {
    /// DWARFの行番号プログラムから行テーブルを構築する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let dwarf = loader.dwarf();
        let mut rows = Vec::new();

        let mut units = dwarf.units();
        while let Some(header) = units.next()? {
            let unit = dwarf.unit(header)?;
            let Some(program) = unit.line_program.clone() else {
                continue;
            };

            let mut program_rows = program.rows();
            while let Some((header, row)) = program_rows.next_row()? {
                if row.end_sequence() {
                    rows.push(LineRow {
                        address: row.address(),
                        file: String::new(),
                        line: 0,
                        is_stmt: false,
                        end_sequence: true,
                    });
                    continue;
                }
                let Some(file) = row.file(header) else {
                    continue;
                };
                let mut path = dwarf
                    .attr_string(&unit, file.path_name())?
                    .to_string_lossy()
                    .into_owned();
                if let Some(dir) = file.directory(header) {
                    let dir = dwarf.attr_string(&unit, dir)?.to_string_lossy().into_owned();
                    if !dir.is_empty() && !path.starts_with('/') {
                        path = format!("{}/{}", dir, path);
                    }
                }
                rows.push(LineRow {
                    address: row.address(),
                    file: path,
                    line: row.line().map(|l| l.get() as u32).unwrap_or(0),
                    is_stmt: row.is_stmt(),
                    end_sequence: false,
                });
            }
        }

        let context = match addr2line::Context::from_dwarf(loader.load_dwarf()?) {
            Ok(context) => Some(context),
            Err(e) => {
                tracing::warn!("addr2line context unavailable for {:?}: {}", loader.path(), e);
                None
            }
        };

        Ok(Self { rows, context })
    }

    /// `file:line` に対応する文の先頭アドレスを返す
    ///
    /// ファイル名はパスの末尾一致で比較します（`main.rs` で `/src/main.rs` にマッチ）。
    pub fn addresses_for_line(&self, file: &str, line: u32) -> Vec<u64> {
        let mut addresses: Vec<u64> = self
            .rows
            .iter()
            .filter(|row| !row.end_sequence && row.is_stmt && row.line == line)
            .filter(|row| file_matches(&row.file, file))
            .map(|row| row.address)
            .collect();
        addresses.sort_unstable();
        addresses.dedup();
        addresses
    }

    /// アドレスを含むソース行のアドレス範囲を返す
    pub fn line_range_for_address(&self, address: u64) -> Option<Range<u64>> {
        let idx = self.rows.windows(2).position(|pair| {
            !pair[0].end_sequence && pair[0].address <= address && address < pair[1].address
        })?;

        let current = &self.rows[idx];
        let same_line = |row: &LineRow| {
            !row.end_sequence && row.file == current.file && row.line == current.line
        };

        let mut first = idx;
        while first > 0
            && same_line(&self.rows[first - 1])
            && self.rows[first - 1].address <= self.rows[first].address
        {
            first -= 1;
        }
        let mut last = idx + 1;
        while last < self.rows.len() && same_line(&self.rows[last]) {
            last += 1;
        }
        let end = self.rows.get(last).map(|row| row.address)?;
        Some(self.rows[first].address..end)
    }

    /// アドレスからソース行情報を取得する
    pub fn lookup(&self, address: u64) -> Result<Option<LineInfo>> {
        let Some(context) = &self.context else {
            return Ok(None);
        };
        let location = context.find_location(address)?;
        Ok(location.and_then(|loc| {
            Some(LineInfo {
                file: loc.file?.to_string(),
                line: loc.line?,
                column: loc.column,
            })
        }))
    }
}

/// パス末尾がコンポーネント単位で一致するか
fn file_matches(full: &str, query: &str) -> bool {
    if full == query {
        return true;
    }
    full.ends_with(query) && full[..full.len() - query.len()].ends_with('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_matches() {
        assert!(file_matches("/src/project/main.rs", "main.rs"));
        assert!(file_matches("/src/project/main.rs", "project/main.rs"));
        assert!(file_matches("main.rs", "main.rs"));
        assert!(!file_matches("/src/project/domain.rs", "main.rs"));
    }

    fn table(rows: Vec<(u64, &str, u32, bool)>) -> LineTable {
        LineTable {
            rows: rows
                .into_iter()
                .map(|(address, file, line, end_sequence)| LineRow {
                    address,
                    file: file.to_string(),
                    line,
                    is_stmt: true,
                    end_sequence,
                })
                .collect(),
            context: None,
        }
    }

    #[test]
    fn test_line_range_for_address() {
        let table = table(vec![
            (0x1000, "a.rs", 10, false),
            (0x1004, "a.rs", 11, false),
            (0x1008, "a.rs", 11, false),
            (0x1010, "a.rs", 12, false),
            (0x1020, "", 0, true),
        ]);
        assert_eq!(table.line_range_for_address(0x1006), Some(0x1004..0x1010));
        assert_eq!(table.line_range_for_address(0x1000), Some(0x1000..0x1004));
        assert_eq!(table.line_range_for_address(0x101f), Some(0x1010..0x1020));
        assert_eq!(table.line_range_for_address(0x1020), None);
    }

    #[test]
    fn test_addresses_for_line() {
        let table = table(vec![
            (0x1000, "/x/a.rs", 10, false),
            (0x1004, "/x/a.rs", 11, false),
            (0x1008, "/x/b.rs", 11, false),
            (0x1010, "", 0, true),
        ]);
        assert_eq!(table.addresses_for_line("a.rs", 11), vec![0x1004]);
        assert!(table.addresses_for_line("a.rs", 99).is_empty());
    }
}
