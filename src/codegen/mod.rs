use std::fs;

use thiserror::Error;
use tracing::{debug, instrument};

/// Wildcard marker substituted with a concrete identifier when rendering
/// file path and keyword templates.
pub const WILDCARD: char = '?';

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("Unable to read {path}. {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Unable to write {path}. {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

fn render(template: &str, id: u32) -> String {
    template.replace(WILDCARD, &id.to_string())
}

/// Copies each template file rendered at `source_id` to one copy per
/// destination identifier, renumbering every keyword occurrence.
/// Replacements are applied in keyword list order. Destination files are
/// created or overwritten; a write that fails after a successful read leaves
/// the destination untouched or truncated.
#[instrument(skip_all)]
pub fn duplicate(
    files: &[&str],
    keywords: &[&str],
    source_id: u32,
    destination_ids: &[u32],
) -> Result<(), GenerateError> {
    let source_files: Vec<String> = files.iter().map(|file| render(file, source_id)).collect();
    let source_keywords: Vec<String> = keywords
        .iter()
        .map(|keyword| render(keyword, source_id))
        .collect();

    for &destination_id in destination_ids {
        let destination_keywords: Vec<String> = keywords
            .iter()
            .map(|keyword| render(keyword, destination_id))
            .collect();

        for (index, file) in files.iter().enumerate() {
            let mut code =
                fs::read_to_string(&source_files[index]).map_err(|source| GenerateError::Read {
                    path: source_files[index].clone(),
                    source,
                })?;

            for (source_keyword, destination_keyword) in
                source_keywords.iter().zip(&destination_keywords)
            {
                code = code.replace(source_keyword.as_str(), destination_keyword);
            }

            let destination_file = render(file, destination_id);
            fs::write(&destination_file, code).map_err(|source| GenerateError::Write {
                path: destination_file.clone(),
                source,
            })?;
            debug!("Wrote {}.", destination_file);
        }
    }

    Ok(())
}

/// Renumbers keyword occurrences in one file in place. Remappings are applied
/// sequentially over the same buffer, so later pairs see the results of
/// earlier ones; pair order must avoid unintended double substitution.
#[instrument(skip_all)]
pub fn replace(
    path: &str,
    keywords: &[&str],
    old_ids: &[u32],
    new_ids: &[u32],
) -> Result<(), GenerateError> {
    let mut contents = fs::read_to_string(path).map_err(|source| GenerateError::Read {
        path: path.to_string(),
        source,
    })?;

    for (&old_id, &new_id) in old_ids.iter().zip(new_ids) {
        for keyword in keywords {
            contents = contents.replace(&render(keyword, old_id), &render(keyword, new_id));
        }
    }

    fs::write(path, contents).map_err(|source| GenerateError::Write {
        path: path.to_string(),
        source,
    })?;
    debug!("Rewrote {}.", path);

    Ok(())
}
