use chrono::{DateTime, Datelike, Utc};
use log::*;
use serde::Serialize;
use tide::{Redirect, Request, Response, StatusCode};

use crate::api_models::{DetailPage, IndexPage, SamplePoll, StaticPage};
use crate::models::{Choice, Poll};
use crate::AppState;

/**
 * Sample polls bundled into the binary, loaded by GET /seed
 */
const SAMPLES: &str = include_str!("../samples.json");

const VOTE_ERROR: &str = "Please make a selection.";

fn current_year() -> i32 {
    Utc::now().year()
}

/**
 * Render the named template into an HTML response
 */
fn render(
    state: &AppState,
    template: &str,
    data: &impl Serialize,
) -> Result<Response, tide::Error> {
    let body = state
        .hb
        .render(template, data)
        .map_err(|err| tide::Error::new(StatusCode::InternalServerError, err))?;
    Ok(Response::builder(StatusCode::Ok)
        .content_type(tide::http::mime::HTML)
        .body(body)
        .build())
}

/**
 * Look up the poll based on the `id` parameter in the request
 */
async fn requested_poll(req: &Request<AppState>) -> Result<Poll, tide::Error> {
    let id = req
        .param::<i32>("id")
        .map_err(|_| tide::Error::from_str(StatusCode::BadRequest, "Invalid poll id"))?;

    sqlx::query_as::<_, Poll>("SELECT id, text, pub_date FROM polls WHERE id = $1")
        .bind(id)
        .fetch_optional(&req.state().db)
        .await?
        .ok_or_else(|| tide::Error::from_str(StatusCode::NotFound, "Could not find poll"))
}

async fn poll_choices<'a, E>(db: E, poll_id: i32) -> Result<Vec<Choice>, sqlx::Error>
where
    E: sqlx::Executor<'a, Database = sqlx::Postgres>,
{
    sqlx::query_as::<_, Choice>(
        "SELECT id, poll_id, text, votes FROM choices WHERE poll_id = $1 ORDER BY id ASC",
    )
    .bind(poll_id)
    .fetch_all(db)
    .await
}

/**
 * Re-render the detail page with the fixed error message, leaving all tallies alone
 */
fn vote_error(state: &AppState, poll: Poll, choices: Vec<Choice>) -> Result<Response, tide::Error> {
    render(
        state,
        "detail",
        &DetailPage {
            title: "Poll",
            year: current_year(),
            poll,
            choices,
            error_message: Some(VOTE_ERROR),
        },
    )
}

/**
 * Build the legacy JSON payload for GET /questions/:poll_id
 *
 * The `publication` and `voite` keys are load-bearing: existing consumers
 * of the old questionnaire API parse exactly these names.
 */
fn legacy_poll_json(
    id: i32,
    text: &str,
    publication: DateTime<Utc>,
    choices: &[(i32, String, i32)],
) -> serde_json::Value {
    let poll = serde_json::json!({
        "id": id,
        "text": text,
        "publication": publication.format("%Y-%m-%dT%H:%M:%S%.6f%:z").to_string(),
    });
    let choices: Vec<serde_json::Value> = choices
        .iter()
        .map(|(id, text, votes)| serde_json::json!({"id": id, "text": text, "voite": votes}))
        .collect();
    serde_json::json!([poll, choices])
}

// Not a constant-time comparison; SEED_TOKEN only gates the sample-data
// loader, not any user credential.
fn bearer_matches(header: Option<&str>, token: &str) -> bool {
    match header {
        Some(header) => header == format!("Bearer {}", token),
        None => false,
    }
}

/**
 *  GET /
 */
pub async fn index(req: Request<AppState>) -> Result<Response, tide::Error> {
    let polls = sqlx::query_as::<_, Poll>("SELECT id, text, pub_date FROM polls ORDER BY pub_date DESC")
        .fetch_all(&req.state().db)
        .await?;

    render(
        req.state(),
        "index",
        &IndexPage {
            title: "Polls",
            year: current_year(),
            polls,
        },
    )
}

/**
 *  GET /about
 */
pub async fn about(req: Request<AppState>) -> Result<Response, tide::Error> {
    render(
        req.state(),
        "about",
        &StaticPage {
            title: "About",
            message: "Your application description page.",
            year: current_year(),
        },
    )
}

/**
 *  GET /contact
 */
pub async fn contact(req: Request<AppState>) -> Result<Response, tide::Error> {
    render(
        req.state(),
        "contact",
        &StaticPage {
            title: "Contact",
            message: "Your contact page.",
            year: current_year(),
        },
    )
}

pub mod polls {
    use log::*;
    use tide::{Redirect, Request, Response};

    use crate::api_models::{DetailPage, ResultsPage, VoteForm};
    use crate::AppState;

    /**
     *  GET /poll/:id
     */
    pub async fn detail(req: Request<AppState>) -> Result<Response, tide::Error> {
        let poll = super::requested_poll(&req).await?;
        let choices = super::poll_choices(&req.state().db, poll.id).await?;

        super::render(
            req.state(),
            "detail",
            &DetailPage {
                title: "Poll",
                year: super::current_year(),
                poll,
                choices,
                error_message: None,
            },
        )
    }

    /**
     *  GET /poll/:id/results
     */
    pub async fn results(req: Request<AppState>) -> Result<Response, tide::Error> {
        let poll = super::requested_poll(&req).await?;
        let choices = super::poll_choices(&req.state().db, poll.id).await?;

        super::render(
            req.state(),
            "results",
            &ResultsPage {
                title: "Results",
                year: super::current_year(),
                poll,
                choices,
            },
        )
    }

    /**
     *  POST /poll/:id/vote
     *
     * A vote for a choice that exists and belongs to the poll bumps its tally
     * by one and redirects to the results page. Anything else re-renders the
     * detail page with an error message and touches nothing.
     */
    pub async fn vote(mut req: Request<AppState>) -> Result<Response, tide::Error> {
        let body = req.body_string().await?;
        let ballot: VoteForm = serde_qs::from_str(&body).unwrap_or_default();
        let poll = super::requested_poll(&req).await?;

        let selected = match ballot.choice {
            Some(choice) => choice,
            None => {
                debug!("Vote on poll {} without a selection", poll.id);
                let choices = super::poll_choices(&req.state().db, poll.id).await?;
                return super::vote_error(req.state(), poll, choices);
            },
        };

        let mut tx = req.state().db.begin().await?;
        let updated =
            sqlx::query("UPDATE choices SET votes = votes + 1 WHERE id = $1 AND poll_id = $2")
                .bind(selected)
                .bind(poll.id)
                .execute(&mut tx)
                .await?;

        if updated.rows_affected() == 0 {
            warn!("Vote on poll {} for unknown choice {}", poll.id, selected);
            // Read through this transaction and release it before rendering;
            // the handler must never hold two pool connections at once.
            let choices = super::poll_choices(&mut tx, poll.id).await?;
            tx.rollback().await?;
            return super::vote_error(req.state(), poll, choices);
        }

        tx.commit().await?;
        info!("Recorded vote for choice {} in poll {}", selected, poll.id);
        Ok(Redirect::see_other(format!("/poll/{}/results", poll.id)).into())
    }
}

pub mod questions {
    use sqlx::Row;
    use tide::{Body, Request, StatusCode};

    use crate::models::Choice;
    use crate::AppState;

    /**
     *  GET /questions
     *
     * Serializer-shaped dump of every choice in the database
     */
    pub async fn all(req: Request<AppState>) -> Result<Body, tide::Error> {
        let choices = sqlx::query_as::<_, Choice>(
            "SELECT id, poll_id, text, votes FROM choices ORDER BY id ASC",
        )
        .fetch_all(&req.state().db)
        .await?;

        Body::from_json(&choices)
    }

    /**
     *  GET /questions/:poll_id
     *
     * Hand-built dump of one poll from raw parameterized SQL, in the legacy
     * [poll, choices] wire shape
     */
    pub async fn by_poll(req: Request<AppState>) -> Result<Body, tide::Error> {
        let poll_id = req
            .param::<i32>("poll_id")
            .map_err(|_| tide::Error::from_str(StatusCode::BadRequest, "Invalid poll id"))?;

        let mut tx = req.state().db.begin().await?;
        let poll = sqlx::query("SELECT id, text, pub_date FROM polls WHERE id = $1")
            .bind(poll_id)
            .fetch_one(&mut tx)
            .await?;

        let choices: Vec<(i32, String, i32)> =
            sqlx::query("SELECT id, text, votes FROM choices WHERE poll_id = $1 ORDER BY id ASC")
                .bind(poll_id)
                .fetch_all(&mut tx)
                .await?
                .iter()
                .map(|row| (row.get("id"), row.get("text"), row.get("votes")))
                .collect();

        let payload = super::legacy_poll_json(
            poll.get("id"),
            poll.get("text"),
            poll.get("pub_date"),
            &choices,
        );
        Body::from_json(&payload)
    }
}

/**
 *  GET /seed
 *
 * Bulk-loads the bundled sample polls, one transaction for the whole batch.
 * Gated behind a bearer token from the SEED_TOKEN environment variable.
 */
pub async fn seed(req: Request<AppState>) -> Result<Response, tide::Error> {
    let token = match std::env::var("SEED_TOKEN") {
        Ok(token) if !token.is_empty() => token,
        _ => {
            warn!("Rejecting /seed, no SEED_TOKEN configured");
            return Ok(Response::new(StatusCode::Unauthorized));
        },
    };

    let authorization = req.header("authorization").map(|values| values.last().as_str());
    if !bearer_matches(authorization, &token) {
        return Ok(Response::new(StatusCode::Unauthorized));
    }

    let samples: Vec<SamplePoll> = serde_json::from_str(SAMPLES)?;

    let mut tx = req.state().db.begin().await?;
    for sample in samples.iter() {
        let (poll_id,): (i32,) =
            sqlx::query_as("INSERT INTO polls (text, pub_date) VALUES ($1, $2) RETURNING id")
                .bind(&sample.text)
                .bind(Utc::now())
                .fetch_one(&mut tx)
                .await?;

        for choice in sample.choices.iter() {
            sqlx::query("INSERT INTO choices (poll_id, text, votes) VALUES ($1, $2, 0)")
                .bind(poll_id)
                .bind(choice)
                .execute(&mut tx)
                .await?;
        }
    }
    tx.commit().await?;

    info!("Seeded {} sample polls", samples.len());
    Ok(Redirect::new("/").into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn poll_fixture() -> Poll {
        Poll {
            id: 1,
            text: "Tabs or spaces?".to_string(),
            pub_date: Utc.ymd(2020, 1, 2).and_hms_micro(3, 4, 5, 678_901),
        }
    }

    fn choices_fixture() -> Vec<Choice> {
        vec![
            Choice {
                id: 10,
                poll_id: 1,
                text: "Tabs".to_string(),
                votes: 0,
            },
            Choice {
                id: 11,
                poll_id: 1,
                text: "Spaces".to_string(),
                votes: 3,
            },
        ]
    }

    #[test]
    fn samples_file_parses() {
        let samples: Vec<SamplePoll> = serde_json::from_str(SAMPLES).expect("parse samples.json");
        assert!(!samples.is_empty());
        for sample in &samples {
            assert!(!sample.text.is_empty());
            assert!(sample.choices.len() >= 2);
        }
    }

    #[async_std::test]
    async fn invalid_vote_rerenders_detail_with_error() {
        let state = AppState {
            db: sqlx::postgres::PgPoolOptions::new()
                .connect_lazy("postgres://localhost/unused")
                .expect("lazy pool"),
            hb: std::sync::Arc::new(crate::load_templates().expect("templates")),
        };

        let mut response = vote_error(&state, poll_fixture(), choices_fixture()).expect("render");
        assert_eq!(StatusCode::Ok, response.status());

        let body = response.take_body().into_string().await.expect("body");
        assert!(body.contains(VOTE_ERROR));
        assert!(body.contains("/poll/1/vote"));
    }

    #[test]
    fn static_pages_render() {
        let hb = crate::load_templates().expect("templates");
        for &(template, message) in &[
            ("about", "Your application description page."),
            ("contact", "Your contact page."),
        ] {
            let html = hb
                .render(
                    template,
                    &StaticPage {
                        title: "Page",
                        message,
                        year: 2020,
                    },
                )
                .expect("render");
            assert!(html.contains(message));
        }
    }

    #[test]
    fn legacy_json_keeps_old_keys() {
        let poll = poll_fixture();
        let choices = vec![(10, "Tabs".to_string(), 0), (11, "Spaces".to_string(), 3)];
        let payload = legacy_poll_json(poll.id, &poll.text, poll.pub_date, &choices);

        assert_eq!(
            "2020-01-02T03:04:05.678901+00:00",
            payload[0]["publication"].as_str().unwrap()
        );
        assert_eq!(3, payload[1][1]["voite"].as_i64().unwrap());
        assert!(payload[1][0].get("votes").is_none());
    }

    #[test]
    fn detail_template_shows_error_message() {
        let hb = crate::load_templates().expect("templates");
        let html = hb
            .render(
                "detail",
                &DetailPage {
                    title: "Poll",
                    year: 2020,
                    poll: poll_fixture(),
                    choices: choices_fixture(),
                    error_message: Some(VOTE_ERROR),
                },
            )
            .expect("render");

        assert!(html.contains(VOTE_ERROR));
        assert!(html.contains("/poll/1/vote"));
        assert!(html.contains("Spaces"));
    }

    #[test]
    fn detail_template_without_error_message() {
        let hb = crate::load_templates().expect("templates");
        let html = hb
            .render(
                "detail",
                &DetailPage {
                    title: "Poll",
                    year: 2020,
                    poll: poll_fixture(),
                    choices: choices_fixture(),
                    error_message: None,
                },
            )
            .expect("render");

        assert!(!html.contains(VOTE_ERROR));
    }

    #[test]
    fn index_template_links_each_poll() {
        let hb = crate::load_templates().expect("templates");
        let html = hb
            .render(
                "index",
                &IndexPage {
                    title: "Polls",
                    year: 2020,
                    polls: vec![poll_fixture()],
                },
            )
            .expect("render");

        assert!(html.contains("/poll/1"));
        assert!(html.contains("Tabs or spaces?"));
    }

    #[test]
    fn results_template_shows_tallies() {
        let hb = crate::load_templates().expect("templates");
        let html = hb
            .render(
                "results",
                &crate::api_models::ResultsPage {
                    title: "Results",
                    year: 2020,
                    poll: poll_fixture(),
                    choices: choices_fixture(),
                },
            )
            .expect("render");

        assert!(html.contains("Spaces"));
        assert!(html.contains("3"));
    }

    #[test]
    fn bearer_token_comparison() {
        assert!(bearer_matches(Some("Bearer sesame"), "sesame"));
        assert!(!bearer_matches(Some("Bearer wrong"), "sesame"));
        assert!(!bearer_matches(Some("sesame"), "sesame"));
        assert!(!bearer_matches(None, "sesame"));
    }
}
