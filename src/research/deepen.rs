//! Auto-deepen recovery: seed discovery, link ranking, click-or-navigate,
//! and extraction, driven entirely through the allowlisted browser tools.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::tool_call::ToolCall;
use crate::tool_dispatcher::{BrowserUserTab, ToolExecutor};

use super::evidence::EvidenceRecord;

const KNOWN_NEWS_HOSTS: &[&str] = &[
    "reuters.com",
    "forbes.com",
    "finance.yahoo.com",
    "thedefiant.io",
    "cointelegraph.com",
    "coindesk.com",
];

const UTILITY_PATH_MARKERS: &[&str] =
    &["/search", "/about", "/contact", "/privacy", "/terms", "/legal", "/login", "/signup"];

const LINK_COLLECT_SCRIPT: &str =
    "Array.from(document.querySelectorAll('a[href]')).slice(0,500).map(a=>({href:a.href,text:a.textContent.trim()}))";

const TOTAL_CANDIDATE_BUDGET: usize = 48;
const MAX_SUB_LINKS_PER_INDEX_PAGE: usize = 2;

static DATE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/20\d{2}/\d{2}(/\d{2})?").expect("valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeepenStatus {
    Completed,
    Partial,
    Noop,
}

pub struct DeepenOutcome {
    pub status: DeepenStatus,
    pub seed_count: usize,
    pub candidate_count: usize,
    pub tool_call_count: usize,
    pub execution_failed: bool,
    pub evidence: Vec<(String, Value)>,
}

/// Builds the seed URL list: prior failed-extraction URLs plus a
/// keyword-derived fallback list, deduped by host, capped at `seed_cap`.
pub fn build_seeds(
    failed_urls: &[String],
    keywords: &[String],
    seed_cap: usize,
) -> Vec<String> {
    let mut seeds = Vec::new();
    let mut seen_hosts = std::collections::HashSet::new();

    for url in failed_urls {
        let host = host_of(url);
        if seen_hosts.insert(host) {
            seeds.push(url.clone());
        }
    }

    let topical = keywords.iter().any(|k| {
        matches!(
            k.to_lowercase().as_str(),
            "rwa" | "defi" | "crypto" | "bitcoin" | "ethereum" | "tokenization" | "stablecoin"
        )
    });

    if topical {
        for host in KNOWN_NEWS_HOSTS {
            if seeds.len() >= seed_cap {
                break;
            }
            let url = format!("https://{host}/");
            if seen_hosts.insert((*host).to_owned()) {
                seeds.push(url);
            }
        }
    } else {
        let query = keywords.join(" ");
        let fallback = format!("https://duckduckgo.com/html/?q={}", urlencoding::encode(&query));
        if seen_hosts.insert(host_of(&fallback)) {
            seeds.push(fallback);
        }
    }

    seeds.truncate(seed_cap);
    seeds
}

fn host_of(url: &str) -> String {
    url.split("://").nth(1).unwrap_or(url).split('/').next().unwrap_or(url).to_owned()
}

#[derive(Debug, Clone)]
struct LinkCandidate {
    href: String,
    text: String,
    score: i32,
}

/// `rankArticleLinkCandidates`.
fn rank_candidates(seed: &str, links: &[(String, String)], keywords: &[String], target_year: i32) -> Vec<LinkCandidate> {
    let seed_host = host_of(seed);
    let mut ranked: Vec<LinkCandidate> = links
        .iter()
        .filter(|(href, _)| !href.contains("google.com/search") && !href.contains("bing.com/search"))
        .filter(|(href, _)| !UTILITY_PATH_MARKERS.iter().any(|m| href.contains(m)))
        .filter(|(href, _)| host_of(href) == seed_host || seed_host.contains("duckduckgo"))
        .map(|(href, text)| {
            let mut score = 0;
            if DATE_PATH_RE.is_match(href) {
                score += 5;
            }
            let segments = href.trim_start_matches("https://").trim_start_matches("http://").split('/').count();
            if segments >= 3 {
                score += 2;
            }
            if let Some(last) = href.rsplit('/').next() {
                if last.contains('-') {
                    score += 2;
                }
                if last.len() >= 24 {
                    score += 1;
                }
            }
            if text.split_whitespace().count() >= 4 {
                score += 1;
            }
            let haystack = format!("{href} {text}").to_lowercase();
            let keyword_hits = keywords.iter().filter(|k| haystack.contains(&k.to_lowercase())).count();
            if keyword_hits > 0 {
                score += keyword_hits as i32 * 2;
            } else if !keywords.is_empty() {
                score -= 1;
            }
            if href.contains(&format!("/{target_year}/")) {
                score += 3;
            }
            LinkCandidate {
                href: href.clone(),
                text: text.clone(),
                score,
            }
        })
        .collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked.truncate(8);
    ranked
}

/// Drives the auto-deepen sequence: for each seed, navigate, collect links
/// via an in-page evaluate script, scroll and recollect, rank candidates,
/// then click-or-navigate and extract each one.
pub async fn auto_deepen(
    executor: &dyn ToolExecutor,
    run_id: &str,
    seeds: &[String],
    keywords: &[String],
    target_year: i32,
    browser_user_tab: Option<&BrowserUserTab>,
) -> DeepenOutcome {
    let mut tool_call_count = 0usize;
    let mut candidate_count = 0usize;
    let mut evidence = Vec::new();
    let mut host_failures: HashMap<String, (u32, u32)> = HashMap::new();
    let mut execution_failed = false;
    let mut remaining_budget = TOTAL_CANDIDATE_BUDGET;

    for seed in seeds.iter().take(12) {
        let host = host_of(seed);
        if let Some((fail, success)) = host_failures.get(&host) {
            if *fail >= 2 && *success == 0 {
                continue;
            }
        }

        let navigate = ToolCall {
            tool_name: "browser.navigate".to_owned(),
            input: json!({ "url": seed }),
        };
        tool_call_count += 1;
        let Ok(_) = executor.execute(run_id, &navigate, browser_user_tab).await else {
            execution_failed = true;
            host_failures.entry(host.clone()).or_default().0 += 1;
            continue;
        };

        let collect = ToolCall {
            tool_name: "browser.evaluate".to_owned(),
            input: json!({ "script": LINK_COLLECT_SCRIPT }),
        };
        tool_call_count += 1;
        let mut links = match executor.execute(run_id, &collect, browser_user_tab).await {
            Ok(output) => parse_links(&output),
            Err(_) => {
                execution_failed = true;
                Vec::new()
            }
        };

        for dy in [1200, 1200, 1200] {
            let scroll = ToolCall {
                tool_name: "browser.scroll".to_owned(),
                input: json!({ "dx": 0, "dy": dy }),
            };
            tool_call_count += 1;
            let _ = executor.execute(run_id, &scroll, browser_user_tab).await;
        }

        let recollect = ToolCall {
            tool_name: "browser.evaluate".to_owned(),
            input: json!({ "script": LINK_COLLECT_SCRIPT }),
        };
        tool_call_count += 1;
        match executor.execute(run_id, &recollect, browser_user_tab).await {
            Ok(output) => {
                for link in parse_links(&output) {
                    if !links.iter().any(|(href, _)| *href == link.0) {
                        links.push(link);
                    }
                }
            }
            Err(_) => execution_failed = true,
        }

        let mut candidates = rank_candidates(seed, &links, keywords, target_year);
        if candidates.len() > remaining_budget {
            candidates.truncate(remaining_budget);
        }
        remaining_budget -= candidates.len();
        candidate_count += candidates.len();

        for candidate in candidates {
            let result =
                dispatch_extraction(executor, run_id, &candidate, browser_user_tab, &mut tool_call_count, &mut evidence).await;
            if !result.success {
                host_failures.entry(host.clone()).or_default().0 += 1;
                execution_failed = true;
                continue;
            }
            host_failures.entry(host.clone()).or_default().1 += 1;

            if !result.no_extractable_content {
                continue;
            }

            let collect_sub = ToolCall {
                tool_name: "browser.evaluate".to_owned(),
                input: json!({ "script": LINK_COLLECT_SCRIPT }),
            };
            tool_call_count += 1;
            let Ok(sub_output) = executor.execute(run_id, &collect_sub, browser_user_tab).await else {
                continue;
            };
            let sub_links = parse_links(&sub_output);
            let sub_candidates = rank_candidates(&result.url, &sub_links, keywords, target_year);
            for sub_candidate in sub_candidates.into_iter().take(MAX_SUB_LINKS_PER_INDEX_PAGE) {
                let sub_result =
                    dispatch_extraction(executor, run_id, &sub_candidate, browser_user_tab, &mut tool_call_count, &mut evidence)
                        .await;
                if sub_result.success {
                    host_failures.entry(host.clone()).or_default().1 += 1;
                } else {
                    host_failures.entry(host.clone()).or_default().0 += 1;
                    execution_failed = true;
                }
            }
        }

        if remaining_budget == 0 {
            break;
        }
    }

    let status = if evidence.is_empty() {
        DeepenStatus::Noop
    } else if execution_failed {
        DeepenStatus::Partial
    } else {
        DeepenStatus::Completed
    };

    DeepenOutcome {
        status,
        seed_count: seeds.len(),
        candidate_count,
        tool_call_count,
        execution_failed,
        evidence,
    }
}

fn with_url(mut output: Value, url: &str) -> Value {
    if let Some(obj) = output.as_object_mut() {
        obj.entry("url").or_insert_with(|| Value::String(url.to_owned()));
    }
    output
}

struct ExtractionOutcome {
    success: bool,
    no_extractable_content: bool,
    url: String,
}

fn is_no_extractable_content(output: &Value) -> bool {
    let diagnostics = output.get("diagnostics").unwrap_or(output);
    diagnostics.get("reason_code").and_then(Value::as_str) == Some("no_extractable_content")
}

/// Click-or-navigate to `candidate`, then run the metadata/text/scroll/text
/// extraction sequence, recording each successful extract as evidence.
async fn dispatch_extraction(
    executor: &dyn ToolExecutor,
    run_id: &str,
    candidate: &LinkCandidate,
    browser_user_tab: Option<&BrowserUserTab>,
    tool_call_count: &mut usize,
    evidence: &mut Vec<(String, Value)>,
) -> ExtractionOutcome {
    let (success, url_out) = click_or_navigate(executor, run_id, candidate, browser_user_tab, tool_call_count).await;
    if !success {
        return ExtractionOutcome { success: false, no_extractable_content: false, url: url_out };
    }

    let mut no_extractable_content = false;

    let metadata = ToolCall {
        tool_name: "browser.extract".to_owned(),
        input: json!({ "mode": "metadata" }),
    };
    *tool_call_count += 1;
    if let Ok(out) = executor.execute(run_id, &metadata, browser_user_tab).await {
        no_extractable_content |= is_no_extractable_content(&out);
        evidence.push(("browser.extract".to_owned(), with_url(out, &url_out)));
    }

    let text = ToolCall {
        tool_name: "browser.extract".to_owned(),
        input: json!({ "mode": "text" }),
    };
    *tool_call_count += 1;
    if let Ok(out) = executor.execute(run_id, &text, browser_user_tab).await {
        no_extractable_content |= is_no_extractable_content(&out);
        evidence.push(("browser.extract".to_owned(), with_url(out, &url_out)));
    }

    let scroll = ToolCall {
        tool_name: "browser.scroll".to_owned(),
        input: json!({ "dx": 0, "dy": 900 }),
    };
    *tool_call_count += 1;
    let _ = executor.execute(run_id, &scroll, browser_user_tab).await;

    let text_again = ToolCall {
        tool_name: "browser.extract".to_owned(),
        input: json!({ "mode": "text" }),
    };
    *tool_call_count += 1;
    if let Ok(out) = executor.execute(run_id, &text_again, browser_user_tab).await {
        no_extractable_content |= is_no_extractable_content(&out);
        evidence.push(("browser.extract".to_owned(), with_url(out, &url_out)));
    }

    ExtractionOutcome { success: true, no_extractable_content, url: url_out }
}

async fn click_or_navigate(
    executor: &dyn ToolExecutor,
    run_id: &str,
    candidate: &LinkCandidate,
    browser_user_tab: Option<&BrowserUserTab>,
    tool_call_count: &mut usize,
) -> (bool, String) {
    let click = ToolCall {
        tool_name: "browser.evaluate".to_owned(),
        input: json!({
            "script": format!(
                "const link=[...document.querySelectorAll('a[href]')].find(a=>a.href==={:?}||a.textContent.includes({:?}));if(link){{link.scrollIntoView();link.click();}}",
                candidate.href, candidate.text,
            )
        }),
    };
    *tool_call_count += 1;
    if executor.execute(run_id, &click, browser_user_tab).await.is_ok() {
        return (true, candidate.href.clone());
    }

    let navigate = ToolCall {
        tool_name: "browser.navigate".to_owned(),
        input: json!({ "url": candidate.href }),
    };
    *tool_call_count += 1;
    match executor.execute(run_id, &navigate, browser_user_tab).await {
        Ok(_) => (true, candidate.href.clone()),
        Err(_) => (false, candidate.href.clone()),
    }
}

fn parse_links(output: &Value) -> Vec<(String, String)> {
    output
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| {
                    let href = v.get("href")?.as_str()?.to_owned();
                    let text = v.get("text").and_then(Value::as_str).unwrap_or("").to_owned();
                    Some((href, text))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Collects evidence records directly from a deepen run's `(tool_name, output)`
/// pairs, reusing the same aggregation as the main loop.
pub fn evidence_from_outcome(outcome: &DeepenOutcome) -> Vec<EvidenceRecord> {
    super::evidence::collect(&outcome.evidence)
}
