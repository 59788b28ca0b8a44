use crate::emotion::Emotion;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const LOG_TARGET: &str = "recommend::fallback";

/// Flat song lists are grouped three ways; neutral and sad share a list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SongBucket {
    Angry,
    Happy,
    NeutralOrSad,
}

impl SongBucket {
    pub const ALL: [SongBucket; 3] = [SongBucket::Angry, SongBucket::Happy, SongBucket::NeutralOrSad];

    pub const fn for_emotion(emotion: Emotion) -> Self {
        match emotion {
            Emotion::Angry => SongBucket::Angry,
            Emotion::Happy => SongBucket::Happy,
            Emotion::Neutral | Emotion::Sad => SongBucket::NeutralOrSad,
        }
    }

    pub const fn file_name(self) -> &'static str {
        match self {
            SongBucket::Angry => "Angry.csv",
            SongBucket::Happy => "Happy.csv",
            SongBucket::NeutralOrSad => "NeutralOrSad.csv",
        }
    }

    const fn index(self) -> usize {
        match self {
            SongBucket::Angry => 0,
            SongBucket::Happy => 1,
            SongBucket::NeutralOrSad => 2,
        }
    }
}

/// Per-bucket ordered song ids, used when the analyzed catalog has nothing to offer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FallbackSongs {
    buckets: [Vec<String>; 3],
}

impl FallbackSongs {
    pub fn from_lists(angry: Vec<String>, happy: Vec<String>, neutral_or_sad: Vec<String>) -> Self {
        Self {
            buckets: [angry, happy, neutral_or_sad],
        }
    }

    /// Reads one CSV per bucket from `dir`. A missing or unreadable file leaves
    /// that bucket empty.
    pub fn load(dir: &Path) -> Self {
        let mut songs = Self::default();
        for bucket in SongBucket::ALL {
            let path = dir.join(bucket.file_name());
            match fs::read_to_string(&path) {
                Ok(text) => songs.buckets[bucket.index()] = parse_song_column(&text),
                Err(e) => {
                    warn!(target: LOG_TARGET, path = %path.display(), "song list unavailable: {e}")
                }
            }
        }
        info!(
            target: LOG_TARGET,
            angry = songs.count(SongBucket::Angry),
            happy = songs.count(SongBucket::Happy),
            neutral_or_sad = songs.count(SongBucket::NeutralOrSad),
            "fallback song lists loaded"
        );
        songs
    }

    pub fn count(&self, bucket: SongBucket) -> usize {
        self.buckets[bucket.index()].len()
    }

    pub fn get(&self, bucket: SongBucket, index: usize) -> Option<&str> {
        self.buckets[bucket.index()].get(index).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }
}

/// First column of every row after the header; blank cells are dropped.
fn parse_song_column(text: &str) -> Vec<String> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let cell = first_cell(line);
            (!cell.is_empty()).then_some(cell)
        })
        .collect()
}

fn first_cell(line: &str) -> String {
    let line = line.trim_end_matches('\r');
    if let Some(rest) = line.strip_prefix('"') {
        // quoted cell; "" is an escaped quote
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    out.push('"');
                    chars.next();
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return out.trim().to_owned();
    }
    line.split(',').next().unwrap_or_default().trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_and_sad_share_a_bucket() {
        assert_eq!(SongBucket::for_emotion(Emotion::Sad), SongBucket::NeutralOrSad);
        assert_eq!(SongBucket::for_emotion(Emotion::Neutral), SongBucket::NeutralOrSad);
        assert_eq!(SongBucket::for_emotion(Emotion::Angry), SongBucket::Angry);
    }

    #[test]
    fn parses_first_column_after_header() {
        let csv = "Song Name,Artist\r\nRiver Flows,Yiruma\n\"Hello, World\",Someone\n\n,blank\n\"Say \"\"Hi\"\"\",x\n";
        assert_eq!(
            parse_song_column(csv),
            vec!["River Flows", "Hello, World", "Say \"Hi\""]
        );
    }

    #[test]
    fn unterminated_quote_runs_to_end_of_line() {
        assert_eq!(first_cell("\"Hello, World"), "Hello, World");
        assert_eq!(first_cell("\"  padded, still open  \r"), "padded, still open");
        assert_eq!(
            parse_song_column("name\n\"open,quote\nnext,row\n"),
            vec!["open,quote", "next"]
        );
    }

    #[test]
    fn load_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Happy.csv"), "songs\nsunrise\nsummer\n").unwrap();

        let songs = FallbackSongs::load(dir.path());
        assert_eq!(songs.count(SongBucket::Happy), 2);
        assert_eq!(songs.get(SongBucket::Happy, 1), Some("summer"));
        assert_eq!(songs.count(SongBucket::Angry), 0);
        assert_eq!(songs.get(SongBucket::Angry, 0), None);
        assert!(!songs.is_empty());

        assert!(FallbackSongs::load(&dir.path().join("nope")).is_empty());
    }
}
