use crate::select::SelectionCriterion;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Archives Reddit submissions (post, full comment tree, media) to local storage")]
pub struct Args {
    /// Submission ID or URL to archive (repeatable)
    #[arg(short = 'i', long = "id", value_name = "ID|URL")]
    pub ids: Vec<String>,

    /// Archive the submissions you saved
    #[arg(long)]
    pub saved: bool,

    /// Like --saved, also resolving saved comments to their parent submission
    #[arg(long)]
    pub saved_comments: bool,

    /// Archive the submissions you upvoted
    #[arg(long)]
    pub upvoted: bool,

    /// Archive submissions posted by USER (defaults to yourself)
    #[arg(long, value_name = "USER", num_args = 0..=1, default_missing_value = "me")]
    pub submitted: Option<String>,

    /// Like --submitted, also resolving the user's comments to their submission
    #[arg(long, value_name = "USER", num_args = 0..=1, default_missing_value = "me")]
    pub submitted_comments: Option<String>,

    /// Cap per listing-based selection; explicit IDs are never limited
    #[arg(short = 'l', long, value_name = "N")]
    pub limit: Option<u32>,

    /// Config file to use
    #[arg(short = 'c', long, value_name = "path", default_value = "./config.yml")]
    pub config: PathBuf,

    /// Output directory (overrides the config default)
    #[arg(short = 'o', long, value_name = "path")]
    pub output: Option<PathBuf>,

    /// Only print errors
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl Args {
    /// Flags → selection criteria, explicit IDs first. Empty means the
    /// invocation selected nothing and should fail before authenticating.
    pub fn criteria(&self) -> Vec<SelectionCriterion> {
        let mut criteria: Vec<SelectionCriterion> = self
            .ids
            .iter()
            .map(|id| SelectionCriterion::ExplicitId(id.clone()))
            .collect();
        if self.saved {
            criteria.push(SelectionCriterion::SavedByMe);
        }
        if self.saved_comments {
            criteria.push(SelectionCriterion::SavedByMeIncludingComments);
        }
        if self.upvoted {
            criteria.push(SelectionCriterion::UpvotedByMe);
        }
        if let Some(user) = &self.submitted {
            criteria.push(SelectionCriterion::PostedBy(user.clone()));
        }
        if let Some(user) = &self.submitted_comments {
            criteria.push(SelectionCriterion::PostedByIncludingComments(user.clone()));
        }
        criteria
    }
}
