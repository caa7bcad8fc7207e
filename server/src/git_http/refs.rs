//! Parsing of `git ls-remote --symref` output into reference records.

use thiserror::Error;

const SYMREF_PREFIX: &str = "ref: ";

/// A reference resolved to a concrete object id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub objid: String,
    pub refname: String,
}

/// A symbolic reference: `source` names `target` (e.g. `HEAD` names
/// `refs/heads/main`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymRef {
    pub target: String,
    pub source: String,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RemoteRefs {
    pub sym_refs: Vec<SymRef>,
    pub resolved: Vec<ResolvedRef>,
}

#[derive(Debug, Error)]
pub enum RefParseError {
    #[error("ls-remote output is not valid utf-8")]
    NotUtf8,
    #[error("malformed ls-remote record '{0}'")]
    MalformedRecord(String),
}

/// Each non-empty line is `<left> TAB <refname>`; a `ref: ` prefix on the left
/// field marks a symbolic reference, anything else is an object id. Order is
/// preserved within each category.
pub fn parse_ls_remote(stdout: &[u8]) -> Result<RemoteRefs, RefParseError> {
    let text = std::str::from_utf8(stdout).map_err(|_| RefParseError::NotUtf8)?;
    let mut refs = RemoteRefs::default();
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        let (left, refname) = line
            .split_once('\t')
            .ok_or_else(|| RefParseError::MalformedRecord(line.to_string()))?;
        match left.strip_prefix(SYMREF_PREFIX) {
            Some(target) => refs.sym_refs.push(SymRef {
                target: target.to_string(),
                source: refname.to_string(),
            }),
            None => refs.resolved.push(ResolvedRef {
                objid: left.to_string(),
                refname: refname.to_string(),
            }),
        }
    }
    Ok(refs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_symrefs_and_resolved_refs() {
        let stdout = b"ref: refs/heads/main\tHEAD\n\
            aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\tHEAD\n\
            aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\trefs/heads/main\n\
            bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb\trefs/heads/dev\n";
        let refs = parse_ls_remote(stdout).unwrap();

        assert_eq!(
            refs.sym_refs,
            vec![SymRef {
                target: "refs/heads/main".to_string(),
                source: "HEAD".to_string(),
            }]
        );
        assert_eq!(refs.resolved.len(), 3);
        assert_eq!(refs.resolved[0].refname, "HEAD");
        assert_eq!(refs.resolved[1].refname, "refs/heads/main");
        assert_eq!(refs.resolved[2].refname, "refs/heads/dev");
        assert_eq!(
            refs.resolved[2].objid,
            "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
        );
    }

    #[test]
    fn strips_trailing_whitespace_per_line() {
        let refs = parse_ls_remote(b"cccc\trefs/tags/v1  \n").unwrap();
        assert_eq!(refs.resolved[0].refname, "refs/tags/v1");
    }

    #[test]
    fn rejects_records_without_a_tab() {
        assert!(matches!(
            parse_ls_remote(b"not a record\n"),
            Err(RefParseError::MalformedRecord(_))
        ));
    }

    #[test]
    fn empty_output_yields_no_records() {
        assert_eq!(parse_ls_remote(b"").unwrap(), RemoteRefs::default());
    }
}
