use serde::{Deserialize, Serialize};

/**
 * Form body submitted from the vote button on the detail page
 *
 * The browser omits `choice` entirely when no radio button is selected.
 */
#[derive(Debug, Default, Deserialize)]
pub struct VoteForm {
    pub choice: Option<i32>,
}

/**
 * One entry in the bundled samples.json seed file
 */
#[derive(Debug, Deserialize)]
pub struct SamplePoll {
    pub text: String,
    pub choices: Vec<String>,
}

/**
 * Context for rendering index.hbs
 */
#[derive(Debug, Serialize)]
pub struct IndexPage {
    pub title: &'static str,
    pub year: i32,
    pub polls: Vec<crate::models::Poll>,
}

/**
 * Context for rendering the static about/contact pages
 */
#[derive(Debug, Serialize)]
pub struct StaticPage {
    pub title: &'static str,
    pub message: &'static str,
    pub year: i32,
}

/**
 * Context for rendering detail.hbs
 *
 * `error_message` is set when a vote submission had no usable selection.
 */
#[derive(Debug, Serialize)]
pub struct DetailPage {
    pub title: &'static str,
    pub year: i32,
    pub poll: crate::models::Poll,
    pub choices: Vec<crate::models::Choice>,
    pub error_message: Option<&'static str>,
}

/**
 * Context for rendering results.hbs
 */
#[derive(Debug, Serialize)]
pub struct ResultsPage {
    pub title: &'static str,
    pub year: i32,
    pub poll: crate::models::Poll,
    pub choices: Vec<crate::models::Choice>,
}
