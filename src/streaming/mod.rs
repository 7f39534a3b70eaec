pub mod openai_to_anthropic;
