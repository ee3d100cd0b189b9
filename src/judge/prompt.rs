//! Judge prompt rendering.

use std::fs;

use serde::Serialize;
use tera::{Context, Tera};

use super::rubric::Rubric;
use crate::collector::CollectedArtifacts;
use crate::error::JudgeError;

/// System message sent ahead of every judge prompt.
pub const JUDGE_SYSTEM_PROMPT: &str = "You are a strict, consistent code reviewer. \
You score work against the rubric you are given and answer only with the requested JSON object.";

const JUDGE_PROMPT_TEMPLATE: &str = r#"# Rubric: {{ rubric_name }}

{{ rubric }}
{% if context %}
# Context

{{ context }}
{% endif %}
# Files under review
{% if files | length == 0 %}
No files were collected for this session.
{% endif %}{% for file in files %}
## {{ file.path }}

```
{{ file.content }}
```
{% endfor %}{% if partial %}
Note: the session did not complete; these files are a partial snapshot.
{% endif %}
# Instructions

Score the files above against the rubric. Every score is an integer from 1 to 5.
Respond with a single JSON object and nothing else, in exactly this shape:

{% raw %}```json
{
  "overall": 4,
  "dimensions": {"<dimension name>": 4},
  "justification": "<why these scores>",
  "strengths": ["<strength>"],
  "weaknesses": ["<weakness>"]
}
```{% endraw %}
"#;

/// One collected file as shown to the judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactFile {
    pub path: String,
    pub content: String,
}

/// Reads every collected file verbatim, in collection order.
pub fn read_artifacts(artifacts: &CollectedArtifacts) -> Result<Vec<ArtifactFile>, JudgeError> {
    artifacts
        .paths()
        .map(|(relative, absolute)| {
            let bytes = fs::read(&absolute)?;
            Ok(ArtifactFile {
                path: relative,
                content: String::from_utf8_lossy(&bytes).to_string(),
            })
        })
        .collect()
}

/// Renders the user prompt for one rubric.
pub fn render_prompt(
    rubric: &Rubric,
    files: &[ArtifactFile],
    context: Option<&str>,
    partial: bool,
) -> Result<String, JudgeError> {
    let mut ctx = Context::new();
    ctx.insert("rubric_name", &rubric.name);
    ctx.insert("rubric", rubric.content.trim());
    ctx.insert("context", &context.map(str::trim).unwrap_or_default());
    ctx.insert("files", files);
    ctx.insert("partial", &partial);

    Ok(Tera::one_off(JUDGE_PROMPT_TEMPLATE, &ctx, false)?)
}
