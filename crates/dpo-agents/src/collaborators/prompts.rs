//! Prompt text sent to model servers

use dpo_sandbox::builtins::MODULES;
use dpo_types::TaskKind;
use std::fmt::Write as _;

fn module_listing() -> String {
    let mut out = String::new();
    for module in MODULES {
        let _ = writeln!(out, "- {}: {}", module.name, module.functions.join(", "));
    }
    out
}

/// Ask for a snippet answering `question` over the table bound to `df`
#[must_use]
pub fn snippet_prompt(question: &str, schema_hint: &str) -> String {
    format!(
        "You write analysis snippets in a small expression language.\n\
         \n\
         Statements: `import <module>`, `let <name> = <expr>`, and a final expression whose value is the answer.\n\
         Expressions: literals, names, lists, `module.function(args)`, arithmetic, comparisons, `and`, `or`, `not`.\n\
         There are no loops, no function definitions and no other modules.\n\
         \n\
         Available modules:\n{modules}\n\
         The input table is bound to `df`. Its columns: {schema_hint}\n\
         \n\
         Question: {question}\n\
         \n\
         Answer with a single fenced code block and nothing else.",
        modules = module_listing(),
    )
}

/// Ask for a JSON workflow plan
#[must_use]
pub fn plan_prompt(request: &str, datasets: &str) -> String {
    let kinds: Vec<&str> = TaskKind::ALL.iter().map(|k| k.as_str()).collect();
    format!(
        "Break the request into data-analysis steps.\n\
         \n\
         Reply with JSON only, in this shape:\n\
         {{\"steps\": [{{\"kind\": \"extract\", \"params\": {{}}, \"input\": {{\"source\": \"dataset\", \"name\": \"sales\"}}, \"depends_on\": []}}]}}\n\
         \n\
         - kind is one of: {kinds}\n\
         - transform steps set params.op to filter, select, aggregate, join, sort, head, distinct, drop_nulls, fill_nulls, rename or export\n\
         - query steps set params.question\n\
         - depends_on lists indices of earlier steps whose output the step reads\n\
         - input is omitted when the step reads its dependencies\n\
         \n\
         Known datasets: {datasets}\n\
         \n\
         Request: {request}",
        kinds = kinds.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_prompt_lists_every_module() {
        let prompt = snippet_prompt("total sales", "sales:float (3 rows)");
        for module in MODULES {
            assert!(prompt.contains(&format!("- {}:", module.name)));
        }
        assert!(prompt.contains("Question: total sales"));
        assert!(prompt.contains("sales:float (3 rows)"));
    }

    #[test]
    fn plan_prompt_names_kinds_and_datasets() {
        let prompt = plan_prompt("load sales then profile", "sales, orders");
        assert!(prompt.contains("custom-code"));
        assert!(prompt.contains("Known datasets: sales, orders"));
        assert!(prompt.ends_with("Request: load sales then profile"));
    }
}
