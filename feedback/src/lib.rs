pub mod batch;
pub mod lexicon;
pub mod matching;
