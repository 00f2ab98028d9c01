mod api_test;
mod helpers;
mod lntxbot_test;
