//! ビルドIDからシンボルファイルへの対応表
//!
//! `ids.txt` 形式（1行に `<16進ビルドID> <パス>`）のファイルと、シンボルファイル・
//! ディレクトリの走査結果からビルドIDの対応表を作ります。走査結果は遅延構築され、
//! 接続し直した際などに [`BuildIdIndex::clear_cache`] で破棄します。

use crate::loader::hex_string;
use crate::Result;
use object::Object;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 情報メッセージの通知先
pub type InformationCallback = Box<dyn Fn(&str)>;

/// ビルドID対応表
#[derive(Default)]
pub struct BuildIdIndex {
    /// 手動で登録された対応
    manual_mappings: BTreeMap<String, PathBuf>,
    /// `ids.txt` 形式のファイル
    build_id_files: Vec<PathBuf>,
    /// 個別のシンボルファイル、またはそれを含むディレクトリ
    sources: Vec<PathBuf>,
    /// 構築済みの対応表。None なら未構築
    cache: Option<BTreeMap<String, PathBuf>>,
    information_callback: Option<InformationCallback>,
}

impl BuildIdIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 情報メッセージ（読み込んだ件数など）の通知先を設定する
    pub fn set_information_callback(&mut self, callback: InformationCallback) {
        self.information_callback = Some(callback);
    }

    /// ビルドIDのファイルを返す
    pub fn file_for_build_id(&mut self, build_id: &str) -> Option<PathBuf> {
        let build_id = build_id.to_ascii_lowercase();
        if let Some(path) = self.manual_mappings.get(&build_id) {
            return Some(path.clone());
        }
        self.ensure_cache().get(&build_id).cloned()
    }

    /// 対応を手動で追加する（キャッシュの破棄では消えない）
    pub fn add_build_id_mapping(&mut self, build_id: &str, path: impl Into<PathBuf>) {
        self.manual_mappings
            .insert(build_id.to_ascii_lowercase(), path.into());
    }

    /// `ids.txt` 形式のファイルを追加する
    pub fn add_build_id_file(&mut self, path: impl Into<PathBuf>) {
        self.build_id_files.push(path.into());
        self.clear_cache();
    }

    /// シンボルファイルまたはディレクトリを追加する
    pub fn add_symbol_source(&mut self, path: impl Into<PathBuf>) {
        self.sources.push(path.into());
        self.clear_cache();
    }

    /// 構築済みの対応表を破棄する。次の検索で作り直される
    pub fn clear_cache(&mut self) {
        self.cache = None;
    }

    /// 対応表がすでに構築されているか
    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// すべての対応（手動登録を含む）
    pub fn mappings(&mut self) -> BTreeMap<String, PathBuf> {
        let mut all = self.ensure_cache().clone();
        all.extend(
            self.manual_mappings
                .iter()
                .map(|(id, path)| (id.clone(), path.clone())),
        );
        all
    }

    fn ensure_cache(&mut self) -> &BTreeMap<String, PathBuf> {
        if self.cache.is_none() {
            let cache = self.build_cache();
            self.cache = Some(cache);
        }
        self.cache.get_or_insert_with(BTreeMap::new)
    }

    fn build_cache(&self) -> BTreeMap<String, PathBuf> {
        let mut cache = BTreeMap::new();

        for file in &self.build_id_files {
            match load_ids_txt(file) {
                Ok(entries) => {
                    self.inform(&format!(
                        "Loaded {} build IDs from {}",
                        entries.len(),
                        file.display()
                    ));
                    cache.extend(entries);
                }
                Err(e) => self.inform(&format!("Can't open build ID file {}: {}", file.display(), e)),
            }
        }

        for source in &self.sources {
            if source.is_dir() {
                let before = cache.len();
                index_directory(source, &mut cache);
                self.inform(&format!(
                    "Indexed {} symbol files from {}",
                    cache.len() - before,
                    source.display()
                ));
            } else {
                match build_id_of_file(source) {
                    Ok(Some(id)) => {
                        cache.insert(id, source.clone());
                    }
                    Ok(None) => self.inform(&format!("No build ID in {}", source.display())),
                    Err(e) => self.inform(&format!("Can't read {}: {}", source.display(), e)),
                }
            }
        }

        cache
    }

    fn inform(&self, message: &str) {
        tracing::debug!("{}", message);
        if let Some(callback) = &self.information_callback {
            callback(message);
        }
    }
}

/// `ids.txt` を読み込む。相対パスはファイルのあるディレクトリから解決する
fn load_ids_txt(path: &Path) -> Result<Vec<(String, PathBuf)>> {
    let contents = fs::read_to_string(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    Ok(parse_ids_txt(&contents, base))
}

fn parse_ids_txt(contents: &str, base: &Path) -> Vec<(String, PathBuf)> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (id, file) = line.split_once(char::is_whitespace)?;
            let file = Path::new(file.trim());
            let file = if file.is_relative() {
                base.join(file)
            } else {
                file.to_path_buf()
            };
            Some((id.to_ascii_lowercase(), file))
        })
        .collect()
}

/// ディレクトリ直下のファイルからビルドIDを集める（サブディレクトリは見ない）
fn index_directory(dir: &Path, cache: &mut BTreeMap<String, PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Ok(Some(id)) = build_id_of_file(&path) {
            cache.insert(id, path);
        }
    }
}

/// ファイルのビルドIDを読む。オブジェクトファイルでなければエラー
pub fn build_id_of_file(path: &Path) -> Result<Option<String>> {
    let data = fs::read(path)?;
    let file = object::File::parse(&*data)?;
    Ok(file.build_id()?.map(hex_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_parse_ids_txt() {
        let entries = parse_ids_txt(
            "0123ABCD lib/libfoo.so\n\n# comment\nfeed /abs/bar.debug\nbroken\n",
            Path::new("/out"),
        );
        assert_eq!(
            entries,
            vec![
                ("0123abcd".to_string(), PathBuf::from("/out/lib/libfoo.so")),
                ("feed".to_string(), PathBuf::from("/abs/bar.debug")),
            ]
        );
    }

    #[test]
    fn test_manual_mapping_survives_clear() {
        let mut index = BuildIdIndex::new();
        index.add_build_id_mapping("ABCD", "/tmp/x.debug");
        index.clear_cache();
        assert_eq!(index.file_for_build_id("abcd"), Some(PathBuf::from("/tmp/x.debug")));
        assert!(index.file_for_build_id("ef01").is_none());
    }

    #[test]
    fn test_missing_file_reports_information() {
        let messages = Rc::new(RefCell::new(Vec::new()));
        let sink = messages.clone();

        let mut index = BuildIdIndex::new();
        index.set_information_callback(Box::new(move |msg| sink.borrow_mut().push(msg.to_string())));
        index.add_build_id_file("/nonexistent/tsubame/ids.txt");

        assert!(index.file_for_build_id("00").is_none());
        assert!(index.is_cached());
        assert_eq!(messages.borrow().len(), 1);
        assert!(messages.borrow()[0].contains("Can't open build ID file"));

        index.clear_cache();
        assert!(!index.is_cached());
    }
}
