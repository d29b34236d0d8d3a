use crate::cmd::Context;
use crate::output::{format_timestamp, print_json, print_table};
use clap::Args;
use rdo_release_core::{
    store::{ReviewFilter, DEFAULT_REVIEW_LIMIT},
    types::SortOrder,
};

#[derive(Args, Debug)]
pub struct ReviewsArgs {
    /// Only this release
    #[arg(long, short = 'r')]
    pub release: Option<String>,

    /// Maximum number of reviews
    #[arg(long, short = 'l', default_value_t = DEFAULT_REVIEW_LIMIT)]
    pub limit: u32,

    /// Newest review numbers first
    #[arg(long)]
    pub desc: bool,
}

pub fn run(ctx: &Context, args: ReviewsArgs, json: bool) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let filter = ReviewFilter {
        target_release: args.release,
        ..ReviewFilter::default()
    };
    let order = if args.desc {
        SortOrder::Desc
    } else {
        SortOrder::Asc
    };
    let reviews = store.find_reviews(&filter, order, Some(args.limit))?;

    if json {
        return print_json(&reviews);
    }
    if reviews.is_empty() {
        println!("No reviews.");
        return Ok(());
    }
    let rows = reviews
        .iter()
        .map(|r| {
            vec![
                r.review_number.to_string(),
                r.target_release.clone(),
                r.status.to_string(),
                format_timestamp(r.commit_date),
                format_timestamp(r.process_date),
            ]
        })
        .collect();
    print_table(
        &["REVIEW", "RELEASE", "STATUS", "MERGED", "PROCESSED"],
        rows,
    );
    Ok(())
}
